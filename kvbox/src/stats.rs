/// Hit and miss counters of existence checks.
///
/// Counters only grow. They are bumped by
/// [`CacheOperations::exists`](crate::CacheOperations::exists) and nothing else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    hits: u64,
    misses: u64,
}

impl Statistics {
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Share of hits among all checks, `None` before the first check.
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64)
    }

    pub(crate) fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        crate::metrics::record_lookup(hit);
    }
}

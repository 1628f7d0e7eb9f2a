use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kvbox::transport::{SessionOption, TransportResult};
use kvbox::{Connector, Endpoint, TransportError, Value};
use parking_lot::Mutex;
use tracing::trace;

use crate::keyspace::Keyspace;
use crate::transport::MemoryTransport;

/// Script stand-in: receives prefixed keys and arguments, returns the reply
/// or the error message a script would have raised.
pub type ScriptHandler =
    Arc<dyn Fn(&[String], &[String]) -> Result<Value, String> + Send + Sync + 'static>;

/// Step of session setup as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connect { persistent: bool },
    Auth,
    Select(u8),
    Option(SessionOption),
    Ping,
    Close,
}

#[derive(Debug, Default)]
struct Faults {
    failing_connects: u32,
    stalled_connect: Option<Duration>,
    wrong_echoes: u32,
    failing_close: bool,
    failing_commands: bool,
}

pub(crate) struct Shared {
    pub(crate) keyspace: Mutex<Keyspace>,
    pub(crate) password: Option<String>,
    scripts: Mutex<HashMap<String, ScriptHandler>>,
    faults: Mutex<Faults>,
    events: Mutex<Vec<SessionEvent>>,
    connect_attempts: AtomicU32,
}

impl Shared {
    pub(crate) fn script(&self, source_or_digest: &str) -> Option<ScriptHandler> {
        self.scripts.lock().get(source_or_digest).cloned()
    }

    pub(crate) fn record(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }

    pub(crate) fn take_wrong_echo(&self) -> bool {
        let mut faults = self.faults.lock();
        if faults.wrong_echoes > 0 {
            faults.wrong_echoes -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn close_fails(&self) -> bool {
        self.faults.lock().failing_close
    }

    pub(crate) fn commands_fail(&self) -> bool {
        self.faults.lock().failing_commands
    }
}

/// In-process store that hands out [`MemoryTransport`] connections.
///
/// Clones share the same data, so a reconnect sees what the previous
/// connection wrote, like it would against a real server. Faults can be
/// injected to exercise the connect cycle.
///
/// ```
/// use kvbox_memory::MemoryConnector;
///
/// let connector = MemoryConnector::with_password("s3cret");
/// connector.fail_connects(2);
/// assert_eq!(connector.connect_attempts(), 0);
/// ```
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_store(None)
    }

    /// A fresh store that requires `AUTH` with this password before any command.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self::with_store(Some(password.into()))
    }

    fn with_store(password: Option<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                keyspace: Mutex::new(Keyspace::default()),
                password,
                scripts: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                events: Mutex::new(Vec::new()),
                connect_attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Registers a script under its source and its digest.
    pub fn register_script<F>(&self, source: &str, digest: &str, handler: F)
    where
        F: Fn(&[String], &[String]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let handler: ScriptHandler = Arc::new(handler);
        let mut scripts = self.shared.scripts.lock();
        scripts.insert(source.to_owned(), handler.clone());
        scripts.insert(digest.to_owned(), handler);
    }

    /// The next `count` connection attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.shared.faults.lock().failing_connects = count;
    }

    /// Every connection attempt takes `delay` before succeeding.
    pub fn stall_connects(&self, delay: Duration) {
        self.shared.faults.lock().stalled_connect = Some(delay);
    }

    /// The next `count` pings answer `PONG` instead of echoing.
    pub fn wrong_ping_echo(&self, count: u32) {
        self.shared.faults.lock().wrong_echoes = count;
    }

    /// Closing a connection reports an error.
    pub fn fail_close(&self, failing: bool) {
        self.shared.faults.lock().failing_close = failing;
    }

    /// Every command on an open connection fails with an I/O error.
    pub fn fail_commands(&self, failing: bool) {
        self.shared.faults.lock().failing_commands = failing;
    }

    /// Number of `connect`/`pconnect` calls so far.
    pub fn connect_attempts(&self) -> u32 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Session setup steps of every connection, in order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.shared.events.lock().clone()
    }

    /// Stored bytes of a string key, as the transport wrote them.
    pub fn raw(&self, db: u8, key: &str) -> Option<Vec<u8>> {
        self.shared
            .keyspace
            .lock()
            .string(db, key)
            .ok()
            .flatten()
            .cloned()
    }

    /// Stored keys of a database, prefixes included.
    pub fn raw_keys(&self, db: u8) -> Vec<String> {
        self.shared.keyspace.lock().keys(db, "*")
    }

    async fn open(
        &self,
        persistent: bool,
        timeout: Option<Duration>,
    ) -> TransportResult<MemoryTransport> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let (fail, stall) = {
            let mut faults = self.shared.faults.lock();
            let fail = faults.failing_connects > 0;
            if fail {
                faults.failing_connects -= 1;
            }
            (fail, faults.stalled_connect)
        };
        if fail {
            trace!("Refusing connection");
            return Err(TransportError::io("connection refused"));
        }
        if let Some(delay) = stall {
            match timeout {
                Some(timeout) if timeout < delay => {
                    tokio::time::sleep(timeout).await;
                    return Err(TransportError::io("connection timed out"));
                }
                _ => tokio::time::sleep(delay).await,
            }
        }
        self.shared.record(SessionEvent::Connect { persistent });
        Ok(MemoryTransport::new(self.shared.clone()))
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> TransportResult<MemoryTransport> {
        trace!(%endpoint, "Opening in-memory connection");
        self.open(false, timeout).await
    }

    async fn pconnect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> TransportResult<MemoryTransport> {
        trace!(%endpoint, "Opening persistent in-memory connection");
        self.open(true, timeout).await
    }
}

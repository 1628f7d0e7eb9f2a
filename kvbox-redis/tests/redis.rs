//! Tests against a live Redis server.
//!
//! Run with `cargo test -p kvbox-redis -- --ignored`. The server is expected
//! on `KVBOX_REDIS_HOST` (default `127.0.0.1`), port 6379, and its database 9
//! is flushed by the tests.

use std::time::Duration;

use kvbox::{CacheOperations, ClientConfig, ClientConfigBuilder, ConnectionManager, Error, KeyTtl};
use kvbox_redis::RedisConnector;
use pretty_assertions::assert_eq;
use serde_json::json;

fn host() -> String {
    std::env::var("KVBOX_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned())
}

fn builder(prefix: &str) -> ClientConfigBuilder {
    ClientConfig::builder()
        .host(host())
        .unwrap()
        .port(6379)
        .db_index(9)
        .unwrap()
        .connect_timeout(2.0)
        .unwrap()
        .key_prefix(prefix)
}

fn cache(prefix: &str) -> ConnectionManager<RedisConnector> {
    ConnectionManager::new(builder(prefix).build(), RedisConnector::new())
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_round_trip_with_ttl() {
    let mut cache = cache("round trip");
    let value = json!({"id": 1, "tags": ["a"], "active": false});
    cache.set("doc", value.clone()).await.unwrap();
    assert_eq!(cache.get("doc").await.unwrap(), value);

    let KeyTtl::Expires(ttl) = cache.ttl("doc").await.unwrap() else {
        panic!("doc should expire");
    };
    assert!(ttl >= Duration::from_secs(60) && ttl <= Duration::from_secs(159));

    assert!(matches!(cache.get("absent").await, Err(Error::KeyNotFound(_))));
    cache.delete(&["doc"]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_prefix_and_enumeration() {
    let mut cache = cache("Enumeration!");
    cache
        .mset(vec![("a".to_owned(), json!(1)), ("b".to_owned(), json!(null))])
        .await
        .unwrap();

    let mut keys = cache.all_keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);
    let values = cache.all_values().await.unwrap();
    assert_eq!(values.get("b"), Some(&json!(null)));
    cache.delete(&["a", "b"]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_counters_and_sets() {
    let mut cache = cache("counters");
    cache.delete(&["n", "s"]).await.unwrap();

    assert_eq!(cache.incr("n", 5).await.unwrap(), 5);
    assert_eq!(cache.decr("n", 1).await.unwrap(), 4);
    assert_eq!(cache.get("n").await.unwrap(), json!(4));
    assert_eq!(cache.sadd("s", vec![json!(true), json!("x")]).await.unwrap(), 2);
    assert!(cache.sismember("s", json!(true)).await.unwrap());
    assert_eq!(cache.scard("s").await.unwrap(), 2);

    let error = cache.incr("s", 1).await.unwrap_err();
    assert!(matches!(error, Error::ImpossibleValue(_)));
    cache.delete(&["n", "s"]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_script_errors() {
    let mut cache = cache("scripts");
    let reply = cache
        .eval("return ARGV[1]", &[], &["hello".to_owned()])
        .await
        .unwrap();
    assert_eq!(reply, json!("hello"));

    let error = cache
        .eval("return redis.error_reply('boom')", &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(error, Error::ScriptExecutionFailed(_)));

    let error = cache.evalsha("0000", &[], &[]).await.unwrap_err();
    assert!(matches!(error, Error::ScriptExecutionFailed(_)));
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_persistent_connection() {
    let mut cache = ConnectionManager::new(
        builder("persistent").persistent(true).build(),
        RedisConnector::new(),
    );
    cache.connect().await.unwrap();
    assert!(cache.is_connected());
    assert!(!cache.exists("nothing-here").await.unwrap());
    assert_eq!(cache.stats().misses(), 1);
    cache.disconnect().await;
    assert!(!cache.is_connected());
}

#[tokio::test]
async fn test_unreachable_server_exhausts_tries() {
    let config = ClientConfig::builder()
        .host("127.0.0.1")
        .unwrap()
        .port(1)
        .connect_tries(2)
        .unwrap()
        .build();
    let mut cache = ConnectionManager::new(config, RedisConnector::new());

    let error = cache.connect().await.unwrap_err();
    assert!(matches!(error, Error::TriesExceeded { tries: 2, .. }));
}

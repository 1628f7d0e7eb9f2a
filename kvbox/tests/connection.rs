//! Connect cycle tests: session setup, liveness probe, retries and teardown.

use std::error::Error as _;
use std::time::Duration;

use kvbox::transport::SessionOption;
use kvbox::{
    CacheOperations, Capabilities, ClientConfig, ConnectionManager, ConnectionState, Error,
};
use kvbox_memory::{MemoryConnector, SessionEvent};
use pretty_assertions::assert_eq;
use serde_json::json;

fn config(tries: u32) -> ClientConfig {
    ClientConfig::builder()
        .host("cache.test")
        .unwrap()
        .port(6379)
        .connect_tries(tries)
        .unwrap()
        .build()
}

#[tokio::test]
async fn test_not_configured_fails_before_connecting() {
    let connector = MemoryConnector::new();
    let mut cache = ConnectionManager::new(ClientConfig::default(), connector.clone());

    assert!(!cache.is_configured());
    let error = cache.get("k").await.unwrap_err();
    assert!(matches!(error, Error::NotConfigured));
    assert_eq!(connector.connect_attempts(), 0);
    assert_eq!(cache.state(), ConnectionState::NotConnected);
}

#[tokio::test]
async fn test_connects_lazily() {
    let connector = MemoryConnector::new();
    let mut cache = ConnectionManager::new(config(1), connector.clone());

    assert!(cache.is_configured());
    assert!(!cache.is_connected());
    assert_eq!(connector.connect_attempts(), 0);

    cache.set("k", json!(1)).await.unwrap();
    cache.get("k").await.unwrap();
    assert!(cache.is_connected());
    assert_eq!(cache.state(), ConnectionState::Connected);
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test]
async fn test_session_setup_order() {
    let connector = MemoryConnector::with_password("hunter2");
    let config = ClientConfig::builder()
        .host("cache.test")
        .unwrap()
        .port(6379)
        .auth_password("hunter2")
        .unwrap()
        .db_index(2)
        .unwrap()
        .key_prefix("My_Prefix!!")
        .persistent(true)
        .build();
    let mut cache = ConnectionManager::new(config, connector.clone());

    cache.connect().await.unwrap();

    assert_eq!(
        connector.events(),
        vec![
            SessionEvent::Connect { persistent: true },
            SessionEvent::Auth,
            SessionEvent::Select(2),
            SessionEvent::Option(SessionOption::Prefix("my-prefix".to_owned())),
            SessionEvent::Option(SessionOption::Serializer(
                Capabilities::detect().best_serializer()
            )),
            SessionEvent::Ping,
        ]
    );
}

#[tokio::test]
async fn test_narrowed_capabilities_pick_json() {
    let connector = MemoryConnector::new();
    let config = ClientConfig::builder()
        .host("cache.test")
        .unwrap()
        .port(6379)
        .capabilities(Capabilities::minimal())
        .unwrap()
        .build();
    let mut cache = ConnectionManager::new(config, connector.clone());

    cache.connect().await.unwrap();
    assert!(connector.events().contains(&SessionEvent::Option(
        SessionOption::Serializer(kvbox::Serializer::Json)
    )));
}

#[tokio::test]
async fn test_tries_exceeded_after_exact_number_of_attempts() {
    let connector = MemoryConnector::new();
    connector.fail_connects(3);
    let mut cache = ConnectionManager::new(config(3), connector.clone());

    let error = cache.get("k").await.unwrap_err();
    match &error {
        Error::TriesExceeded { tries, .. } => assert_eq!(*tries, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.source().is_some());
    assert_eq!(connector.connect_attempts(), 3);
    assert_eq!(cache.state(), ConnectionState::Failed { tries: 3 });

    // The next operation starts a fresh cycle.
    cache.set("k", json!("v")).await.unwrap();
    assert_eq!(connector.connect_attempts(), 4);
    assert_eq!(cache.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_retry_succeeds_within_budget() {
    let connector = MemoryConnector::new();
    connector.fail_connects(2);
    let mut cache = ConnectionManager::new(config(3), connector.clone());

    cache.connect().await.unwrap();
    assert_eq!(connector.connect_attempts(), 3);
}

#[tokio::test]
async fn test_wrong_ping_echo_counts_as_failed_attempt() {
    let connector = MemoryConnector::new();
    connector.wrong_ping_echo(1);
    let mut cache = ConnectionManager::new(config(2), connector.clone());

    cache.connect().await.unwrap();

    assert_eq!(connector.connect_attempts(), 2);
    let events = connector.events();
    let first_ping = events
        .iter()
        .position(|event| *event == SessionEvent::Ping)
        .unwrap();
    // The half-built connection is closed before retrying.
    assert_eq!(events[first_ping + 1], SessionEvent::Close);
    assert_eq!(events.last(), Some(&SessionEvent::Ping));
}

#[tokio::test]
async fn test_wrong_ping_echo_exhausts_tries() {
    let connector = MemoryConnector::new();
    connector.wrong_ping_echo(1);
    let mut cache = ConnectionManager::new(config(1), connector.clone());

    let error = cache.connect().await.unwrap_err();
    let Error::TriesExceeded { tries, cause } = error else {
        panic!("expected TriesExceeded");
    };
    assert_eq!(tries, 1);
    assert!(cause.to_string().contains("liveness probe"));
}

#[tokio::test]
async fn test_failed_auth_is_a_failed_attempt() {
    let connector = MemoryConnector::with_password("right");
    let config = ClientConfig::builder()
        .host("cache.test")
        .unwrap()
        .port(6379)
        .auth_password("wrong")
        .unwrap()
        .connect_tries(2)
        .unwrap()
        .build();
    let mut cache = ConnectionManager::new(config, connector.clone());

    let error = cache.exists("k").await.unwrap_err();
    assert!(matches!(error, Error::TriesExceeded { tries: 2, .. }));
    assert_eq!(cache.stats().hits() + cache.stats().misses(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_bounds_each_attempt() {
    let connector = MemoryConnector::new();
    connector.stall_connects(Duration::from_secs(30));
    let config = ClientConfig::builder()
        .host("cache.test")
        .unwrap()
        .port(6379)
        .connect_timeout(0.5)
        .unwrap()
        .connect_tries(2)
        .unwrap()
        .build();
    let mut cache = ConnectionManager::new(config, connector.clone());

    let started = tokio::time::Instant::now();
    let error = cache.connect().await.unwrap_err();
    assert!(matches!(error, Error::TriesExceeded { tries: 2, .. }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_disconnect_swallows_teardown_errors() {
    let connector = MemoryConnector::new();
    let mut cache = ConnectionManager::new(config(1), connector.clone());
    cache.set("k", json!(1)).await.unwrap();

    connector.fail_close(true);
    cache.disconnect().await;
    assert!(!cache.is_connected());
    assert_eq!(cache.state(), ConnectionState::NotConnected);

    // Data survives on the store, the next operation reconnects.
    assert_eq!(cache.get("k").await.unwrap(), json!(1));
    assert_eq!(connector.connect_attempts(), 2);
}

#[tokio::test]
async fn test_reconnect_opens_a_new_connection() {
    let connector = MemoryConnector::new();
    let mut cache = ConnectionManager::new(config(1), connector.clone());
    cache.connect().await.unwrap();
    cache.reconnect().await.unwrap();

    assert_eq!(connector.connect_attempts(), 2);
    assert!(connector.events().contains(&SessionEvent::Close));
    assert!(cache.is_connected());
}

#[tokio::test]
async fn test_command_io_failure_is_connection_failed() {
    let connector = MemoryConnector::new();
    let mut cache = ConnectionManager::new(config(1), connector.clone());
    cache.connect().await.unwrap();

    connector.fail_commands(true);
    let error = cache.get("k").await.unwrap_err();
    assert!(matches!(error, Error::ConnectionFailed(_)));
}

//! Tests for the in-memory transport, driven through the transport traits.

use std::time::Duration;

use kvbox::codec::FORMAT_MARKER;
use kvbox::transport::{SessionOption, SetOptions};
use kvbox::{Connector, Endpoint, Serializer, Transport, TransportError};
use kvbox_memory::{MemoryConnector, MemoryTransport, SessionEvent};
use serde_json::json;

fn endpoint() -> Endpoint {
    Endpoint::new("memory", 6379, false)
}

async fn open(connector: &MemoryConnector) -> MemoryTransport {
    connector.connect(&endpoint(), None).await.unwrap()
}

#[tokio::test]
async fn test_values_round_trip_through_codec() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport
        .set_option(SessionOption::Serializer(Serializer::Json))
        .await
        .unwrap();

    let value = json!({"id": 7, "tags": ["a", "b"]});
    assert!(transport.set("doc", value.clone(), SetOptions::default()).await.unwrap());
    assert_eq!(transport.get("doc").await.unwrap(), Some(value.clone()));
    let mut stored = vec![FORMAT_MARKER, 0x00];
    stored.extend(serde_json::to_vec(&value).unwrap());
    assert_eq!(connector.raw(0, "doc"), Some(stored));
    assert_eq!(transport.get("other").await.unwrap(), None);
}

#[tokio::test]
async fn test_prefix_is_applied_and_stripped() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport
        .set_option(SessionOption::Prefix("app:".to_owned()))
        .await
        .unwrap();
    transport.set("a", json!(1), SetOptions::default()).await.unwrap();
    transport.set("b", json!(2), SetOptions::default()).await.unwrap();

    assert_eq!(connector.raw_keys(0), vec!["app:a", "app:b"]);
    assert_eq!(transport.keys("*").await.unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_set_if_absent() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    assert!(transport.set("k", json!("first"), SetOptions::if_absent()).await.unwrap());
    assert!(!transport.set("k", json!("second"), SetOptions::if_absent()).await.unwrap());
    assert_eq!(transport.get("k").await.unwrap(), Some(json!("first")));
}

#[tokio::test]
async fn test_msetnx_is_all_or_nothing() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport.set("b", json!(0), SetOptions::default()).await.unwrap();

    let written = transport
        .msetnx(vec![("a".to_owned(), json!(1)), ("b".to_owned(), json!(2))])
        .await
        .unwrap();
    assert!(!written);
    assert_eq!(transport.get("a").await.unwrap(), None);
    assert_eq!(transport.get("b").await.unwrap(), Some(json!(0)));
}

#[tokio::test(start_paused = true)]
async fn test_keys_expire() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport
        .set("k", json!(1), SetOptions::with_ttl(Some(Duration::from_secs(10))))
        .await
        .unwrap();
    assert_eq!(transport.ttl("k").await.unwrap(), 10);

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(transport.ttl("k").await.unwrap(), 6);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!transport.exists("k").await.unwrap());
    assert_eq!(transport.ttl("k").await.unwrap(), -2);
}

#[tokio::test(start_paused = true)]
async fn test_persist_and_pexpire() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport.set("k", json!(1), SetOptions::default()).await.unwrap();
    assert_eq!(transport.ttl("k").await.unwrap(), -1);
    assert!(!transport.persist("k").await.unwrap());

    assert!(transport.pexpire("k", Duration::from_millis(1500)).await.unwrap());
    assert_eq!(transport.ttl("k").await.unwrap(), 2);
    assert!(transport.persist("k").await.unwrap());
    assert_eq!(transport.ttl("k").await.unwrap(), -1);
    assert!(!transport.pexpire("missing", Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
async fn test_expire_at_in_the_past_deletes() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport.set("k", json!(1), SetOptions::default()).await.unwrap();
    assert!(transport.pexpire_at("k", 1_000_000).await.unwrap());
    assert!(!transport.exists("k").await.unwrap());
}

#[tokio::test]
async fn test_counters_and_wrong_type() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    assert_eq!(transport.incr("n").await.unwrap(), 1);
    assert_eq!(transport.incr_by("n", 9).await.unwrap(), 10);
    assert_eq!(transport.decr_by("n", 4).await.unwrap(), 6);
    assert_eq!(transport.decr("n").await.unwrap(), 5);
    assert_eq!(connector.raw(0, "n"), Some(b"5".to_vec()));
    assert_eq!(transport.get("n").await.unwrap(), Some(json!(5)));

    transport.set("m", json!(41), SetOptions::default()).await.unwrap();
    assert_eq!(transport.incr("m").await.unwrap(), 42);

    transport.sadd("s", vec![json!("x")]).await.unwrap();
    let error = transport.incr("s").await.unwrap_err();
    assert!(matches!(error, TransportError::Rejected(ref message) if message.starts_with("WRONGTYPE")));
}

#[tokio::test]
async fn test_append_and_strlen_use_raw_bytes() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    assert_eq!(transport.append("log", "abc").await.unwrap(), 3);
    assert_eq!(transport.append("log", "de").await.unwrap(), 5);
    assert_eq!(transport.strlen("log").await.unwrap(), 5);
    assert_eq!(connector.raw(0, "log"), Some(b"abcde".to_vec()));
    assert_eq!(transport.get("log").await.unwrap(), Some(json!("abcde")));
}

#[tokio::test]
async fn test_rename() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport.set("a", json!(1), SetOptions::default()).await.unwrap();
    transport.set("b", json!(2), SetOptions::default()).await.unwrap();

    assert!(!transport.renamenx("a", "b").await.unwrap());
    transport.rename("a", "c").await.unwrap();
    assert_eq!(transport.get("c").await.unwrap(), Some(json!(1)));
    assert!(matches!(
        transport.rename("a", "d").await,
        Err(TransportError::Rejected(_))
    ));
}

#[tokio::test]
async fn test_bits() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    assert!(!transport.setbit("bits", 1, true).await.unwrap());
    assert!(transport.setbit("bits", 1, true).await.unwrap());
    assert!(transport.getbit("bits", 1).await.unwrap());
    assert!(!transport.getbit("bits", 0).await.unwrap());
    assert!(!transport.getbit("bits", 100).await.unwrap());
    assert_eq!(connector.raw(0, "bits"), Some(vec![0x40]));
}

#[tokio::test]
async fn test_bit_offsets_past_the_string_limit_are_rejected() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    for offset in [1 << 32, u64::MAX] {
        assert!(matches!(
            transport.setbit("bits", offset, true).await,
            Err(TransportError::Rejected(ref message)) if message.contains("bit offset")
        ));
        assert!(matches!(
            transport.getbit("bits", offset).await,
            Err(TransportError::Rejected(_))
        ));
    }
    assert_eq!(connector.raw(0, "bits"), None);

    let last = (1 << 32) - 1;
    assert!(!transport.getbit("bits", last).await.unwrap());
}

#[tokio::test]
async fn test_sets() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    assert_eq!(transport.sadd("a", vec![json!(1), json!(2), json!(3)]).await.unwrap(), 3);
    assert_eq!(transport.sadd("a", vec![json!(3)]).await.unwrap(), 0);
    transport.sadd("b", vec![json!(2)]).await.unwrap();

    assert_eq!(transport.scard("a").await.unwrap(), 3);
    assert!(transport.sismember("a", json!(1)).await.unwrap());
    assert_eq!(transport.sdiffstore("d", &["a", "b"]).await.unwrap(), 2);
    assert_eq!(transport.srem("d", vec![json!(1), json!(9)]).await.unwrap(), 1);
    assert_eq!(transport.smembers("d").await.unwrap(), vec![json!(3)]);

    assert_eq!(transport.spop("d").await.unwrap(), Some(json!(3)));
    assert_eq!(transport.spop("d").await.unwrap(), None);
    assert!(!transport.exists("d").await.unwrap());
    assert!(transport.srandmember("b").await.unwrap().is_some());
}

#[tokio::test]
async fn test_scripts_report_through_last_error() {
    let connector = MemoryConnector::new();
    connector.register_script("return KEYS[1]", "abc123", |keys, _| Ok(json!(keys[0])));
    connector.register_script("error()", "dead", |_, _| Err("ERR boom".to_owned()));
    let mut transport = open(&connector).await;
    transport
        .set_option(SessionOption::Prefix("p:".to_owned()))
        .await
        .unwrap();

    let reply = transport.evalsha("abc123", &["k"], &[]).await.unwrap();
    assert_eq!(reply, json!("p:k"));
    assert_eq!(transport.last_error(), None);

    transport.eval("error()", &[], &[]).await.unwrap();
    assert_eq!(transport.last_error(), Some("ERR boom".to_owned()));
    transport.clear_last_error();

    transport.evalsha("unknown", &[], &[]).await.unwrap();
    assert!(transport.last_error().unwrap().starts_with("NOSCRIPT"));
}

#[tokio::test]
async fn test_auth_is_required() {
    let connector = MemoryConnector::with_password("secret");
    let mut transport = open(&connector).await;
    assert!(matches!(transport.ping("x").await, Err(TransportError::Rejected(_))));
    assert!(transport.auth("wrong").await.is_err());
    transport.auth("secret").await.unwrap();
    assert_eq!(transport.ping("x").await.unwrap(), "x");
}

#[tokio::test]
async fn test_databases_are_isolated() {
    let connector = MemoryConnector::new();
    let mut first = open(&connector).await;
    let mut second = open(&connector).await;
    second.select(3).await.unwrap();
    assert!(matches!(second.select(16).await, Err(TransportError::Rejected(_))));
    assert_eq!(second.db(), 3);

    first.set("k", json!(1), SetOptions::default()).await.unwrap();
    assert!(!second.exists("k").await.unwrap());
    assert_eq!(connector.raw_keys(3), Vec::<String>::new());
}

#[tokio::test]
async fn test_fault_injection() {
    let connector = MemoryConnector::new();
    connector.fail_connects(1);
    assert!(matches!(
        connector.connect(&endpoint(), None).await,
        Err(TransportError::Io(_))
    ));

    let mut transport = connector.pconnect(&endpoint(), None).await.unwrap();
    connector.wrong_ping_echo(1);
    assert_eq!(transport.ping("probe").await.unwrap(), "PONG");
    assert_eq!(transport.ping("probe").await.unwrap(), "probe");

    connector.fail_commands(true);
    assert!(matches!(transport.get("k").await, Err(TransportError::Io(_))));
    connector.fail_commands(false);

    connector.fail_close(true);
    assert!(transport.close().await.is_err());
    assert!(matches!(transport.get("k").await, Err(TransportError::Io(_))));

    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(
        connector.events(),
        vec![
            SessionEvent::Connect { persistent: true },
            SessionEvent::Ping,
            SessionEvent::Ping,
            SessionEvent::Close,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_connect_times_out() {
    let connector = MemoryConnector::new();
    connector.stall_connects(Duration::from_secs(5));
    let result = connector
        .connect(&endpoint(), Some(Duration::from_secs(1)))
        .await;
    assert!(matches!(result, Err(TransportError::Io(_))));

    let result = connector
        .connect(&endpoint(), Some(Duration::from_secs(10)))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_flushall_clears_every_database() {
    let connector = MemoryConnector::new();
    let mut transport = open(&connector).await;
    transport.set("a", json!(1), SetOptions::default()).await.unwrap();
    transport.select(2).await.unwrap();
    transport.set("b", json!(1), SetOptions::default()).await.unwrap();

    transport.flushall_async().await.unwrap();
    assert!(connector.raw_keys(0).is_empty());
    assert!(connector.raw_keys(2).is_empty());
}

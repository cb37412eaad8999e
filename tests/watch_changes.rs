//! Watch sessions driven through the client, the in-memory store and the in-memory bus.

use keeper_config::notify::{MemoryBus, SUBSCRIPTION_ESTABLISHED};
use keeper_config::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const CHANGE_TOPIC: &str = "edgex/configs/base/wait/x";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct WaitSection {
    x: u32,
    label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct FullConfig {
    wait: WaitSection,
    other: u32,
}

fn message_queue_pairs() -> Vec<KvPair> {
    vec![
        KvPair::new("base/MessageQueue/Type", "mqtt"),
        KvPair::new("base/MessageQueue/Host", "localhost"),
        KvPair::new("base/MessageQueue/Port", "1883"),
        KvPair::new("base/MessageQueue/Optional/ClientId", "base"),
    ]
}

fn seeded_store() -> MemoryKvStore {
    let mut pairs = message_queue_pairs();
    pairs.push(KvPair::new("base/wait/x", "1"));
    pairs.push(KvPair::new("base/other", "3"));
    MemoryKvStore::with_pairs(pairs)
}

struct Watch<T = WaitSection> {
    client: KeeperClient,
    bus: MemoryBus,
    updates: mpsc::Receiver<ConfigUpdate<T>>,
    errors: mpsc::Receiver<ConfigError>,
}

fn start_watch(store: MemoryKvStore, bus: MemoryBus) -> Watch {
    start_watch_on(store, bus, WaitSection::default(), "wait")
}

fn start_watch_on<T>(store: MemoryKvStore, bus: MemoryBus, target: T, wait_key: &str) -> Watch<T>
where
    T: Serialize + serde::de::DeserializeOwned + Clone + Send + 'static,
{
    let client = KeeperClient::builder()
        .with_store(Arc::new(store))
        .with_transport(Arc::new(bus.clone()))
        .with_base_path("base")
        .build()
        .unwrap();

    let (updates_tx, updates) = mpsc::channel(16);
    let (errors_tx, errors) = mpsc::channel(16);
    client.watch_for_changes(updates_tx, errors_tx, target, wait_key);

    Watch {
        client,
        bus,
        updates,
        errors,
    }
}

async fn next_update<T>(watch: &mut Watch<T>) -> Option<ConfigUpdate<T>> {
    timeout(RECV_TIMEOUT, watch.updates.recv())
        .await
        .expect("timed out waiting for an update")
}

async fn next_error<T>(watch: &mut Watch<T>) -> ConfigError {
    timeout(RECV_TIMEOUT, watch.errors.recv())
        .await
        .expect("timed out waiting for an error")
        .expect("error channel closed")
}

async fn publish(bus: &MemoryBus, key: &str, value: &str) {
    bus.publish_pair(CHANGE_TOPIC, &KvPair::new(key, value))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_first_message_is_suppressed_and_second_is_decoded() {
    let mut watch = start_watch(seeded_store(), MemoryBus::new());

    assert_eq!(
        next_update(&mut watch).await,
        Some(ConfigUpdate::Established(SUBSCRIPTION_ESTABLISHED.to_string()))
    );

    publish(&watch.bus, "base/wait/x", "5").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(
        config,
        WaitSection {
            x: 5,
            label: String::new()
        }
    );
}

#[tokio::test]
async fn test_target_is_seeded_from_the_watched_section() {
    let mut pairs = message_queue_pairs();
    pairs.push(KvPair::new("base/wait/label", "seeded"));
    pairs.push(KvPair::new("base/label", "outside"));
    let mut watch = start_watch(MemoryKvStore::with_pairs(pairs), MemoryBus::new());
    next_update(&mut watch).await;

    publish(&watch.bus, "base/wait/x", "4").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(config.label, "seeded");
    assert_eq!(config.x, 4);
}

#[tokio::test]
async fn test_empty_wait_key_watches_the_full_configuration() {
    let mut watch = start_watch_on(seeded_store(), MemoryBus::new(), FullConfig::default(), "");
    assert!(matches!(
        next_update(&mut watch).await,
        Some(ConfigUpdate::Established(_))
    ));

    publish(&watch.bus, "base/wait/x", "5").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(config.wait.x, 5);
    // seeded from the store before subscribing
    assert_eq!(config.other, 3);
}

#[tokio::test]
async fn test_stray_keys_in_the_section_do_not_break_setup() {
    let mut pairs = message_queue_pairs();
    pairs.push(KvPair::new("base/wait/x", "1"));
    pairs.push(KvPair::new("base/wait/Extra/0", "a"));
    pairs.push(KvPair::new("base/wait/Extra/name", "b"));
    let mut watch = start_watch(MemoryKvStore::with_pairs(pairs), MemoryBus::new());

    assert!(matches!(
        next_update(&mut watch).await,
        Some(ConfigUpdate::Established(_))
    ));
    assert!(watch.errors.try_recv().is_err());
}

#[tokio::test]
async fn test_changes_merge_into_previous_state() {
    let mut watch = start_watch(seeded_store(), MemoryBus::new());
    next_update(&mut watch).await;

    publish(&watch.bus, "base/wait/label", "edge").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(config.label, "edge");
    assert_eq!(config.x, 1);

    publish(&watch.bus, "base/wait/x", "9").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(config.label, "edge");
    assert_eq!(config.x, 9);
}

#[tokio::test]
async fn test_no_updates_after_stop() {
    let mut watch = start_watch(seeded_store(), MemoryBus::new());
    next_update(&mut watch).await;
    assert_eq!(watch.bus.subscriber_count(), 1);

    watch.client.stop_watching();
    // the bus may still hold the subscription until the session notices the stop
    let _ = watch
        .bus
        .publish_pair(CHANGE_TOPIC, &KvPair::new("base/wait/x", "7"))
        .await;

    assert_eq!(next_update(&mut watch).await, None);
    assert_eq!(watch.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_decode_errors_do_not_end_the_session() {
    let mut watch = start_watch(seeded_store(), MemoryBus::new());
    next_update(&mut watch).await;

    publish(&watch.bus, "base/wait/x", "lots").await;
    assert!(matches!(next_error(&mut watch).await, ConfigError::Decode { .. }));

    publish(&watch.bus, "base/wait/x", "6").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(config.x, 6);
}

#[tokio::test]
async fn test_transport_errors_are_forwarded() {
    let mut watch = start_watch(seeded_store(), MemoryBus::new());
    next_update(&mut watch).await;

    watch.bus.publish_error("connection lost").await;
    assert!(matches!(next_error(&mut watch).await, ConfigError::MessageBus(_)));

    publish(&watch.bus, "base/wait/x", "2").await;
    let config = next_update(&mut watch).await.unwrap().into_changed().unwrap();
    assert_eq!(config.x, 2);
}

#[tokio::test]
async fn test_client_id_gets_unique_suffix() {
    let mut watch = start_watch(seeded_store(), MemoryBus::new());
    next_update(&mut watch).await;

    let ids = watch.bus.client_ids();
    assert_eq!(ids.len(), 1);
    let suffix = ids[0].strip_prefix("base-").unwrap();
    assert!(suffix.parse::<u32>().is_ok());
}

#[tokio::test]
async fn test_missing_message_queue_section() {
    let store = MemoryKvStore::with_pairs([KvPair::new("base/wait/x", "1")]);
    let mut watch = start_watch(store, MemoryBus::new());

    match next_error(&mut watch).await {
        ConfigError::MessageBus(message) => assert_eq!(
            message,
            "host, port or type from MessageQueue section is not defined in the configuration"
        ),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(next_update(&mut watch).await, None);
    assert_eq!(watch.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_missing_configuration_ends_setup() {
    let mut watch = start_watch(MemoryKvStore::new(), MemoryBus::new());

    assert!(matches!(
        next_error(&mut watch).await,
        ConfigError::ConfigurationNotFound(_)
    ));
    assert_eq!(next_update(&mut watch).await, None);
}

#[tokio::test]
async fn test_refused_connection_is_reported() {
    let bus = MemoryBus::new();
    bus.refuse_connections(true);
    let mut watch = start_watch(seeded_store(), bus);

    assert!(next_error(&mut watch).await.is_unreachable());
    assert_eq!(next_update(&mut watch).await, None);
}

//! In-process message bus.

use super::transport::{
    CLIENT_ID, MessageBusInfo, MessageEnvelope, NotificationTransport, TopicChannel,
    TransportFactory,
};
use crate::error::{ConfigError, Result};
use crate::store::KvPair;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

struct Subscriber {
    id: u64,
    filter: String,
    messages: mpsc::Sender<MessageEnvelope>,
    errors: mpsc::Sender<ConfigError>,
}

#[derive(Default)]
struct MemoryBusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    client_ids: Mutex<Vec<String>>,
    next_id: AtomicU64,
    refuse_connections: AtomicBool,
}

/// Message bus living inside the process.
///
/// Publishers and the watch session share one `MemoryBus` (clones share
/// state). Topic filters use MQTT wildcards: `+` matches one level and a
/// trailing `#` matches any number of remaining levels.
///
/// # Examples
///
/// ```rust
/// use keeper_config::notify::{
///     MemoryBus, MessageBusInfo, NotificationTransport, TopicChannel, TransportFactory,
/// };
/// use keeper_config::store::KvPair;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> keeper_config::error::Result<()> {
/// let bus = MemoryBus::new();
/// let mut transport = bus.create(&MessageBusInfo::default())?;
///
/// let (tx, mut rx) = mpsc::channel(8);
/// let (err_tx, _err_rx) = mpsc::channel(8);
/// transport.connect().await?;
/// transport
///     .subscribe(vec![TopicChannel { topic: "edgex/configs/svc/#".into(), messages: tx }], err_tx)
///     .await?;
///
/// bus.publish_pair("edgex/configs/svc/Writable/LogLevel", &KvPair::new("svc/Writable/LogLevel", "DEBUG"))
///     .await?;
/// assert!(rx.recv().await.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

impl MemoryBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `envelope` to every subscriber whose filter matches `topic`.
    ///
    /// Returns the number of subscribers reached. Subscribers whose receiver
    /// is gone are removed.
    pub async fn publish(&self, topic: &str, mut envelope: MessageEnvelope) -> usize {
        envelope.received_topic = topic.to_string();

        let targets: Vec<(u64, mpsc::Sender<MessageEnvelope>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|subscriber| topic_matches(&subscriber.filter, topic))
            .map(|subscriber| (subscriber.id, subscriber.messages.clone()))
            .collect();

        let mut delivered = 0;
        for (id, messages) in targets {
            if messages.send(envelope.clone()).await.is_ok() {
                delivered += 1;
            } else {
                self.remove(|subscriber| subscriber.id == id);
            }
        }
        delivered
    }

    /// Publish a JSON change notification for `pair`.
    pub async fn publish_pair(&self, topic: &str, pair: &KvPair) -> Result<usize> {
        let envelope = MessageEnvelope::for_pair(topic, pair)?;
        Ok(self.publish(topic, envelope).await)
    }

    /// Report a transport error to every subscriber.
    pub async fn publish_error(&self, message: &str) -> usize {
        let targets: Vec<mpsc::Sender<ConfigError>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|subscriber| subscriber.errors.clone())
            .collect();

        let mut delivered = 0;
        for errors in targets {
            if errors
                .send(ConfigError::MessageBus(message.to_string()))
                .await
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Make later `connect` calls fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Number of active topic subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Client ids of every transport created so far.
    pub fn client_ids(&self) -> Vec<String> {
        self.inner.client_ids.lock().clone()
    }

    fn remove(&self, predicate: impl Fn(&Subscriber) -> bool) {
        self.inner
            .subscribers
            .lock()
            .retain(|subscriber| !predicate(subscriber));
    }
}

impl TransportFactory for MemoryBus {
    fn create(&self, info: &MessageBusInfo) -> Result<Box<dyn NotificationTransport>> {
        if let Some(client_id) = info.optional.get(CLIENT_ID) {
            self.inner.client_ids.lock().push(client_id.clone());
        }
        Ok(Box::new(MemoryBusClient {
            bus: self.clone(),
            connected: false,
            subscription_ids: Vec::new(),
        }))
    }
}

/// A single connection to a [`MemoryBus`].
pub struct MemoryBusClient {
    bus: MemoryBus,
    connected: bool,
    subscription_ids: Vec<u64>,
}

#[async_trait]
impl NotificationTransport for MemoryBusClient {
    async fn connect(&mut self) -> Result<()> {
        if self.bus.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConfigError::Unreachable(
                "memory bus cannot be reached, this service is not available.".to_string(),
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topics: Vec<TopicChannel>,
        errors: mpsc::Sender<ConfigError>,
    ) -> Result<()> {
        if !self.connected {
            return Err(ConfigError::MessageBus(
                "cannot subscribe before connecting".to_string(),
            ));
        }

        let mut subscribers = self.bus.inner.subscribers.lock();
        for channel in topics {
            let id = self.bus.inner.next_id.fetch_add(1, Ordering::SeqCst);
            self.subscription_ids.push(id);
            subscribers.push(Subscriber {
                id,
                filter: channel.topic,
                messages: channel.messages,
                errors: errors.clone(),
            });
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let ids = std::mem::take(&mut self.subscription_ids);
        self.bus.remove(|subscriber| ids.contains(&subscriber.id));
        self.connected = false;
        Ok(())
    }
}

/// Match `topic` against an MQTT style `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("edgex/configs/svc/#", "edgex/configs/svc/Writable/LogLevel"));
        assert!(topic_matches("edgex/configs/svc/#", "edgex/configs/svc"));
        assert!(topic_matches("edgex/+/svc", "edgex/configs/svc"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("edgex/configs/svc/#", "edgex/configs/other/x"));
    }

    async fn subscribed(bus: &MemoryBus, filter: &str) -> (
        Box<dyn NotificationTransport>,
        mpsc::Receiver<MessageEnvelope>,
        mpsc::Receiver<ConfigError>,
    ) {
        let mut transport = bus.create(&MessageBusInfo::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (err_tx, err_rx) = mpsc::channel(8);
        transport.connect().await.unwrap();
        transport
            .subscribe(
                vec![TopicChannel {
                    topic: filter.to_string(),
                    messages: tx,
                }],
                err_tx,
            )
            .await
            .unwrap();
        (transport, rx, err_rx)
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let bus = MemoryBus::new();
        let (_t1, mut rx1, _e1) = subscribed(&bus, "configs/svc/#").await;
        let (_t2, mut rx2, _e2) = subscribed(&bus, "configs/other/#").await;

        let delivered = bus
            .publish_pair("configs/svc/a", &KvPair::new("svc/a", "1"))
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let envelope = rx1.recv().await.unwrap();
        assert_eq!(envelope.received_topic, "configs/svc/a");
        assert!(envelope.is_json());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_removes_subscriptions() {
        let bus = MemoryBus::new();
        let (mut transport, _rx, _err_rx) = subscribed(&bus, "configs/#").await;
        assert_eq!(bus.subscriber_count(), 1);

        transport.disconnect().await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish("configs/a", MessageEnvelope::default()).await, 0);
    }

    #[tokio::test]
    async fn test_publish_error() {
        let bus = MemoryBus::new();
        let (_transport, _rx, mut err_rx) = subscribed(&bus, "configs/#").await;

        assert_eq!(bus.publish_error("broker hiccup").await, 1);
        assert!(matches!(err_rx.recv().await, Some(ConfigError::MessageBus(_))));
    }

    #[tokio::test]
    async fn test_refused_connection_and_subscribe_before_connect() {
        let bus = MemoryBus::new();
        bus.refuse_connections(true);
        let mut transport = bus.create(&MessageBusInfo::default()).unwrap();
        assert!(transport.connect().await.unwrap_err().is_unreachable());

        let (tx, _rx) = mpsc::channel(1);
        let (err_tx, _err_rx) = mpsc::channel(1);
        let result = transport
            .subscribe(
                vec![TopicChannel {
                    topic: "a/#".into(),
                    messages: tx,
                }],
                err_tx,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = MemoryBus::new();
        let (_transport, rx, _err_rx) = subscribed(&bus, "configs/#").await;
        drop(rx);

        assert_eq!(bus.publish("configs/a", MessageEnvelope::default()).await, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_client_ids_recorded() {
        let bus = MemoryBus::new();
        let mut info = MessageBusInfo::default();
        info.optional.insert(CLIENT_ID.into(), "svc-42".into());
        let _transport = bus.create(&info).unwrap();
        assert_eq!(bus.client_ids(), vec!["svc-42".to_string()]);
    }
}

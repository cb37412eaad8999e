//! Watch sessions: streaming store changes into a structured target.

use super::transport::{MessageEnvelope, NotificationTransport, TopicChannel};
use crate::codec::{self, KEY_DELIMITER, path};
use crate::error::ConfigError;
use crate::store::KvPair;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

#[cfg(feature = "metrics")]
use crate::metrics::KeeperMetrics;

/// Informational message sent once the subscription is up.
pub const SUBSCRIPTION_ESTABLISHED: &str = "watch config change subscription established";

const MESSAGE_BUFFER: usize = 64;
const ERROR_BUFFER: usize = 16;

/// What a watch session pushes on its update channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate<T> {
    /// The subscription is in place. Not a configuration change.
    Established(String),
    /// The target after a change was applied to it.
    Changed(T),
}

impl<T> ConfigUpdate<T> {
    /// The changed configuration, if this is a change.
    pub fn into_changed(self) -> Option<T> {
        match self {
            Self::Changed(config) => Some(config),
            Self::Established(_) => None,
        }
    }
}

/// Lifecycle of a watch session.
///
/// `Stopped` is terminal; watching again needs a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Not started
    Idle,
    /// Seeding the target and subscribing
    Establishing,
    /// Subscribed, waiting for the first (suppressed) message
    Established,
    /// Decoding and forwarding changes
    Streaming,
    /// Finished
    Stopped,
}

/// A subscribed session, ready to be spawned.
pub(crate) struct WatchSession<T> {
    pub(crate) state: WatchState,
    /// Watched key. Pairs below it are decoded relative to it.
    pub(crate) scope: String,
    pub(crate) target: T,
    pub(crate) transport: Box<dyn NotificationTransport>,
    pub(crate) messages: mpsc::Receiver<MessageEnvelope>,
    pub(crate) bus_errors: mpsc::Receiver<ConfigError>,
    pub(crate) updates: mpsc::Sender<ConfigUpdate<T>>,
    pub(crate) errors: mpsc::Sender<ConfigError>,
    pub(crate) stop: oneshot::Receiver<()>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<KeeperMetrics>,
}

/// Everything needed to subscribe a connected transport.
pub(crate) struct Subscription<T> {
    pub(crate) scope: String,
    pub(crate) topic: String,
    pub(crate) target: T,
    pub(crate) transport: Box<dyn NotificationTransport>,
    pub(crate) updates: mpsc::Sender<ConfigUpdate<T>>,
    pub(crate) errors: mpsc::Sender<ConfigError>,
    pub(crate) stop: oneshot::Receiver<()>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<KeeperMetrics>,
}

impl<T> Subscription<T> {
    /// Subscribe to the topic and move to `Established`.
    ///
    /// A placeholder message is queued ahead of anything the transport
    /// delivers, so the first message the session sees is always the one it
    /// suppresses, whether or not the transport announces the subscription
    /// on its own.
    pub(crate) async fn subscribe(
        mut self,
    ) -> std::result::Result<WatchSession<T>, (ConfigError, mpsc::Sender<ConfigError>)> {
        let (message_tx, messages) = mpsc::channel(MESSAGE_BUFFER);
        let (bus_error_tx, bus_errors) = mpsc::channel(ERROR_BUFFER);

        if message_tx.send(MessageEnvelope::default()).await.is_err() {
            return Err((
                ConfigError::Other("watch message channel closed".to_string()),
                self.errors,
            ));
        }

        let topics = vec![TopicChannel {
            topic: self.topic.clone(),
            messages: message_tx,
        }];
        if let Err(e) = self.transport.subscribe(topics, bus_error_tx).await {
            if let Err(disconnect_err) = self.transport.disconnect().await {
                tracing::warn!(error = %disconnect_err, "failed to disconnect after subscribe error");
            }
            return Err((e, self.errors));
        }
        tracing::info!(topic = %self.topic, "watching for configuration changes");

        Ok(WatchSession {
            state: WatchState::Established,
            scope: self.scope,
            target: self.target,
            transport: self.transport,
            messages,
            bus_errors,
            updates: self.updates,
            errors: self.errors,
            stop: self.stop,
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
        })
    }
}

impl<T> WatchSession<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Process messages until stopped, then disconnect.
    pub(crate) async fn run(mut self) {
        loop {
            let keep_going = tokio::select! {
                biased;
                _ = &mut self.stop => false,
                Some(err) = self.bus_errors.recv() => self.forward_error(err).await,
                message = self.messages.recv() => match message {
                    Some(envelope) => self.handle(envelope).await,
                    None => {
                        tracing::warn!("notification transport closed the subscription");
                        let _ = self
                            .errors
                            .send(ConfigError::MessageBus("subscription closed".to_string()))
                            .await;
                        false
                    }
                },
            };
            if !keep_going {
                break;
            }
        }

        self.state = WatchState::Stopped;
        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!(error = %e, "failed to disconnect from the message bus");
        }
        tracing::info!(scope = %self.scope, "stopped watching for configuration changes");
    }

    /// Handle one envelope. Returns `false` when the session should stop.
    async fn handle(&mut self, envelope: MessageEnvelope) -> bool {
        if self.state == WatchState::Established {
            self.state = WatchState::Streaming;
            return self
                .push(ConfigUpdate::Established(SUBSCRIPTION_ESTABLISHED.to_string()))
                .await;
        }

        if !envelope.is_json() {
            tracing::debug!(content_type = %envelope.content_type, "dropping non-JSON notification");
            self.record_dropped();
            return true;
        }

        let pair: KvPair = match serde_json::from_slice(&envelope.payload) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(error = %e, topic = %envelope.received_topic, "dropping malformed notification");
                self.record_dropped();
                return true;
            }
        };

        if path::relative_segments(&self.scope, &pair.key, KEY_DELIMITER).is_none() {
            tracing::debug!(key = %pair.key, scope = %self.scope, "dropping notification outside the watched key");
            self.record_dropped();
            return true;
        }

        match codec::decode(&self.scope, std::slice::from_ref(&pair), &mut self.target) {
            Ok(()) => {
                tracing::debug!(key = %pair.key, "configuration change applied");
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.metrics {
                    metrics.record_watch_update();
                }
                self.push(ConfigUpdate::Changed(self.target.clone())).await
            }
            Err(e) => self.forward_error(e).await,
        }
    }

    /// Push an update unless a stop arrives first.
    async fn push(&mut self, update: ConfigUpdate<T>) -> bool {
        tokio::select! {
            biased;
            _ = &mut self.stop => false,
            sent = self.updates.send(update) => sent.is_ok(),
        }
    }

    /// Report an error without ending the session.
    async fn forward_error(&mut self, err: ConfigError) -> bool {
        tracing::warn!(error = %err, "configuration watch error");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_watch_error();
        }
        tokio::select! {
            biased;
            _ = &mut self.stop => false,
            // a caller that dropped its error receiver still gets updates
            _ = self.errors.send(err) => true,
        }
    }

    fn record_dropped(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_watch_dropped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MemoryBus, MessageBusInfo, TransportFactory};
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Wait {
        x: u32,
        name: String,
    }

    struct Harness {
        bus: MemoryBus,
        updates: mpsc::Receiver<ConfigUpdate<Wait>>,
        errors: mpsc::Receiver<ConfigError>,
        stop: oneshot::Sender<()>,
    }

    const TOPIC: &str = "configs/base/wait/#";

    async fn start() -> Harness {
        let bus = MemoryBus::new();
        let mut transport = bus.create(&MessageBusInfo::default()).unwrap();
        transport.connect().await.unwrap();

        let (update_tx, updates) = mpsc::channel(8);
        let (error_tx, errors) = mpsc::channel(8);
        let (stop, stop_rx) = oneshot::channel();

        let subscription = Subscription {
            scope: "base/wait".to_string(),
            topic: TOPIC.to_string(),
            target: Wait::default(),
            transport,
            updates: update_tx,
            errors: error_tx,
            stop: stop_rx,
            #[cfg(feature = "metrics")]
            metrics: None,
        };
        let session = match subscription.subscribe().await {
            Ok(session) => session,
            Err((e, _)) => panic!("subscribe failed: {e}"),
        };
        tokio::spawn(session.run());

        Harness {
            bus,
            updates,
            errors,
            stop,
        }
    }

    async fn next_update(harness: &mut Harness) -> ConfigUpdate<Wait> {
        timeout(Duration::from_secs(2), harness.updates.recv())
            .await
            .expect("timed out waiting for update")
            .expect("update channel closed")
    }

    async fn publish(bus: &MemoryBus, key: &str, value: &str) {
        bus.publish_pair("configs/base/wait/x", &KvPair::new(key, value))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_message_is_informational() {
        let mut harness = start().await;

        assert_eq!(
            next_update(&mut harness).await,
            ConfigUpdate::Established(SUBSCRIPTION_ESTABLISHED.to_string())
        );

        publish(&harness.bus, "base/wait/x", "5").await;
        let config = next_update(&mut harness).await.into_changed().unwrap();
        assert_eq!(config.x, 5);
    }

    #[tokio::test]
    async fn test_changes_accumulate() {
        let mut harness = start().await;
        next_update(&mut harness).await;

        publish(&harness.bus, "base/wait/x", "1").await;
        next_update(&mut harness).await;
        publish(&harness.bus, "base/wait/name", "edge").await;

        let config = next_update(&mut harness).await.into_changed().unwrap();
        assert_eq!(
            config,
            Wait {
                x: 1,
                name: "edge".into()
            }
        );
    }

    #[tokio::test]
    async fn test_irrelevant_messages_are_dropped() {
        let mut harness = start().await;
        next_update(&mut harness).await;

        let text = MessageEnvelope {
            content_type: "text/plain".into(),
            payload: b"base/wait/x=9".to_vec(),
            ..Default::default()
        };
        harness.bus.publish("configs/base/wait/x", text).await;

        let garbage = MessageEnvelope {
            content_type: "application/json".into(),
            payload: b"{not json".to_vec(),
            ..Default::default()
        };
        harness.bus.publish("configs/base/wait/x", garbage).await;

        publish(&harness.bus, "base/other/x", "7").await;
        publish(&harness.bus, "base/wait/x", "3").await;

        // only the last message gets through
        let config = next_update(&mut harness).await.into_changed().unwrap();
        assert_eq!(config.x, 3);
        assert!(harness.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_decode_failure_reported_and_session_continues() {
        let mut harness = start().await;
        next_update(&mut harness).await;

        publish(&harness.bus, "base/wait/x", "many").await;
        let err = timeout(Duration::from_secs(2), harness.errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, ConfigError::Decode { .. }));

        publish(&harness.bus, "base/wait/x", "8").await;
        let config = next_update(&mut harness).await.into_changed().unwrap();
        assert_eq!(config.x, 8);
    }

    #[tokio::test]
    async fn test_transport_errors_forwarded_without_stopping() {
        let mut harness = start().await;
        next_update(&mut harness).await;

        harness.bus.publish_error("broker hiccup").await;
        let err = timeout(Duration::from_secs(2), harness.errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, ConfigError::MessageBus(_)));

        publish(&harness.bus, "base/wait/x", "2").await;
        assert_eq!(
            next_update(&mut harness).await.into_changed().unwrap().x,
            2
        );
    }

    #[tokio::test]
    async fn test_stop_disconnects_and_silences() {
        let mut harness = start().await;
        next_update(&mut harness).await;
        assert_eq!(harness.bus.subscriber_count(), 1);

        harness.stop.send(()).unwrap();

        // the session drops its update sender once it has stopped
        let closed = timeout(Duration::from_secs(2), harness.updates.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(harness.bus.subscriber_count(), 0);

        assert_eq!(
            harness
                .bus
                .publish_pair("configs/base/wait/x", &KvPair::new("base/wait/x", "4"))
                .await
                .unwrap(),
            0
        );
    }
}

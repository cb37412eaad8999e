//! Notification transport abstraction.

use crate::error::{ConfigError, Result};
use crate::store::KvPair;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Content type of change notifications the watch decodes.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Optional bus property holding the client id.
pub const CLIENT_ID: &str = "ClientId";

/// Upper bound (exclusive) of the random suffix appended to client ids.
const CLIENT_ID_SUFFIX_INTERVAL: u32 = 99_999;

/// A message delivered by the notification transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEnvelope {
    /// Topic the message was published on
    pub received_topic: String,
    /// MIME type of `payload`
    pub content_type: String,
    /// Raw message body
    pub payload: Vec<u8>,
}

impl MessageEnvelope {
    /// Build a JSON change notification for a single pair.
    pub fn for_pair(topic: impl Into<String>, pair: &KvPair) -> Result<Self> {
        Ok(Self {
            received_topic: topic.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            payload: serde_json::to_vec(pair)?,
        })
    }

    /// Whether the payload is declared as JSON.
    pub fn is_json(&self) -> bool {
        self.content_type
            .split(';')
            .next()
            .map(|mime| mime.trim().eq_ignore_ascii_case(CONTENT_TYPE_JSON))
            .unwrap_or(false)
    }
}

/// A topic filter and the channel its messages are delivered on.
pub struct TopicChannel {
    /// Topic filter, `#` and `+` wildcards allowed
    pub topic: String,
    /// Where matching messages go
    pub messages: mpsc::Sender<MessageEnvelope>,
}

/// Connection parameters for the message bus, read from the `MessageQueue`
/// section of the stored configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MessageBusInfo {
    /// Bus implementation, e.g. `mqtt`
    #[serde(rename = "Type")]
    pub bus_type: String,
    /// Protocol used to reach the broker
    pub protocol: String,
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Topic prefix data is published to
    pub publish_topic_prefix: String,
    /// Topic to subscribe to
    pub subscribe_topic: String,
    /// Secure connection mode (`none`, `usernamepassword`, ...)
    pub auth_mode: String,
    /// Secret holding the credentials for `auth_mode`
    pub secret_name: String,
    /// Implementation specific properties
    pub optional: HashMap<String, String>,
    /// Whether subscribing is enabled
    pub subscribe_enabled: bool,
}

impl MessageBusInfo {
    /// Check that the fields a subscription needs are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MessageBus`] when host, port or type is missing.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() || self.port == 0 || self.bus_type.is_empty() {
            return Err(ConfigError::MessageBus(
                "host, port or type from MessageQueue section is not defined in the configuration"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Append a random suffix to the client id, if one is configured.
    ///
    /// Two subscribers sharing a client id make the broker drop one of them,
    /// and with it events sent during the subscription.
    pub fn with_unique_client_id(mut self) -> Self {
        if let Some(client_id) = self.optional.get_mut(CLIENT_ID) {
            let suffix = fastrand::u32(..CLIENT_ID_SUFFIX_INTERVAL);
            *client_id = format!("{}-{}", client_id, suffix);
        }
        self
    }
}

/// A connection to the publish/subscribe system carrying change notifications.
///
/// The watch session owns its transport exclusively: it connects, subscribes
/// once and disconnects when it stops.
#[async_trait]
pub trait NotificationTransport: Send {
    /// Connect to the bus.
    async fn connect(&mut self) -> Result<()>;

    /// Subscribe to `topics`. Transport-level errors that happen while
    /// streaming are delivered on `errors`.
    async fn subscribe(
        &mut self,
        topics: Vec<TopicChannel>,
        errors: mpsc::Sender<ConfigError>,
    ) -> Result<()>;

    /// Disconnect from the bus, ending every subscription.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Creates transports from the bus settings found in the configuration.
pub trait TransportFactory: Send + Sync {
    /// Create an unconnected transport.
    fn create(&self, info: &MessageBusInfo) -> Result<Box<dyn NotificationTransport>>;
}

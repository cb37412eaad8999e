//! Change notifications.
//!
//! The transport seam ([`NotificationTransport`], [`TransportFactory`]), an
//! in-process bus implementing it, and the watch session that turns
//! notifications into structured updates.

mod memory_bus;
mod transport;
pub(crate) mod watch;

pub use memory_bus::{MemoryBus, MemoryBusClient, topic_matches};
pub use transport::{
    CLIENT_ID, CONTENT_TYPE_JSON, MessageBusInfo, MessageEnvelope, NotificationTransport,
    TopicChannel, TransportFactory,
};
pub use watch::{ConfigUpdate, SUBSCRIPTION_ESTABLISHED, WatchState};

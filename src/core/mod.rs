//! The configuration client and its settings.

mod builder;
mod client;
mod settings;

pub use builder::KeeperClientBuilder;
pub use client::KeeperClient;
pub use settings::{DEFAULT_TOPIC_PREFIX, ServiceConfig};

//! # keeper-config
//!
//! Keep a service's hierarchical configuration in sync with a flat key-value store.
//!
//! ## Overview
//!
//! `keeper-config` is the client side of a configuration service that stores
//! every leaf of a configuration tree under its own delimited key:
//! - Flatten any `Serialize` value into key/value pairs and back
//! - Fetch, create-if-absent or overwrite a service's configuration
//! - Read and write single values
//! - Watch part of the configuration and receive typed updates on a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keeper_config::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use tokio::sync::mpsc;
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct CoreDataConfig {
//!     writable: WritableInfo,
//! }
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct WritableInfo {
//!     log_level: String,
//! }
//!
//! # async fn example() -> keeper_config::error::Result<()> {
//! let client = KeeperClient::builder()
//!     .with_url("http://localhost:59890")
//!     .with_base_path("edgex/core/2.0/core-data")
//!     .build()?;
//!
//! let mut config = CoreDataConfig::default();
//! client.get_configuration(&mut config).await?;
//! println!("Log level: {}", config.writable.log_level);
//!
//! // Stream changes below Writable/ onto the Writable section
//! let (updates, mut rx) = mpsc::channel(16);
//! let (errors, _errors_rx) = mpsc::channel(16);
//! client.watch_for_changes(updates, errors, config.writable.clone(), "Writable");
//! while let Some(update) = rx.recv().await {
//!     if let ConfigUpdate::Changed(writable) = update {
//!         println!("Log level is now {}", writable.log_level);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Typed decode**: string values are parsed as the type the target declares
//! - **Merge semantics**: decoding only touches the leaves it is given
//! - **Pluggable store**: HTTP store gateway, or the in-memory store for tests
//! - **Pluggable bus**: any [`notify::NotificationTransport`], in-memory bus included
//!
//! ## Feature Flags
//!
//! - `http` (default): HTTP store gateway using `reqwest`
//! - `toml` (default): upload configuration from TOML text
//! - `metrics`: OpenTelemetry metrics for store requests and watch sessions

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod codec;
pub mod core;
pub mod error;
pub mod notify;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{KeeperClient, KeeperClientBuilder, ServiceConfig};
    pub use crate::error::{ConfigError, Result};
    pub use crate::notify::{ConfigUpdate, TransportFactory};
    pub use crate::store::{KvPair, KvStore, MemoryKvStore};

    #[cfg(feature = "http")]
    pub use crate::store::HttpKvStore;
}

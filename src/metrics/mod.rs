//! Built-in metrics for store and watch operations.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Store requests, failures and latency per operation
//! - Watch updates forwarded, errors reported, notifications dropped
//!
//! # Examples
//!
//! ```rust,no_run
//! use keeper_config::prelude::*;
//! use opentelemetry::global;
//!
//! # fn example() -> Result<()> {
//! let meter = global::meter("my-service");
//!
//! let client = KeeperClient::builder()
//!     .with_url("http://localhost:59890")
//!     .with_base_path("edgex/core/2.0/core-data")
//!     .with_metrics(meter)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod keeper_metrics;

pub use keeper_metrics::{InstrumentedStore, KeeperMetrics};

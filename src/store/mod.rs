//! Store gateway implementations.
//!
//! [`KvStore`] is the only seam that performs I/O against the key-value store.

#[cfg(feature = "http")]
mod http;
mod kv_store;
mod memory;

#[cfg(feature = "http")]
pub use http::{API_BASE, API_KV_ROUTE, API_PING_ROUTE, HttpAuth, HttpKvStore, HttpKvStoreBuilder};
pub use kv_store::{KvPair, KvStore};
pub use memory::MemoryKvStore;

//! Key-value store gateway trait.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single key and its stored value.
///
/// Values are kept loosely typed: with the store's plaintext mode most of
/// them arrive as strings, but numbers, booleans and nulls are possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvPair {
    /// Full key path
    pub key: String,
    /// Stored value
    #[serde(default)]
    pub value: Value,
}

impl KvPair {
    /// Create a new pair.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Narrow gateway over the remote key-value store.
///
/// Keys are always full paths; no implicit prefix is added. Read operations
/// report a prefix with no keys as an empty result, never as an error.
///
/// Implement this trait to plug in another store or a test double.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unreachable`](crate::error::ConfigError::Unreachable)
    /// when the store cannot be contacted.
    async fn ping(&self) -> Result<()>;

    /// List every key at or below `key`.
    async fn get_keys_under_prefix(&self, key: &str) -> Result<Vec<String>>;

    /// Fetch every pair at or below `key`.
    async fn get_all_under_prefix(&self, key: &str) -> Result<Vec<KvPair>>;

    /// Create or overwrite a single key.
    async fn put_single(&self, key: &str, value: Value) -> Result<()>;

    /// Flatten `value` below `key` and upsert every resulting pair in one request.
    async fn put_subtree(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove every key at or below `key`. Removing nothing is not an error.
    async fn delete_subtree(&self, key: &str) -> Result<()>;

    /// Get a human-readable name for this store (for logging/debugging).
    fn name(&self) -> String;
}

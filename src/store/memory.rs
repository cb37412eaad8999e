//! In-process key-value store.

use super::{KvPair, KvStore};
use crate::codec::{self, KEY_DELIMITER, path};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Key-value store kept in memory.
///
/// Behaves like the remote store as far as the gateway contract goes:
/// prefix lookups are segment-aware, subtree writes are flattened with the
/// store's stringification, and missing prefixes read as empty. Clones share
/// the same data, so a test can keep a handle while the client owns another.
///
/// # Examples
///
/// ```rust
/// use keeper_config::store::{KvStore, MemoryKvStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryKvStore::new();
/// store.put_single("svc/Writable/LogLevel", "INFO".into()).await.unwrap();
/// assert_eq!(
///     store.get_keys_under_prefix("svc").await.unwrap(),
///     vec!["svc/Writable/LogLevel"]
/// );
/// assert!(store.get_keys_under_prefix("svc/Service").await.unwrap().is_empty());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `pairs`.
    pub fn with_pairs(pairs: impl IntoIterator<Item = KvPair>) -> Self {
        let store = Self::new();
        {
            let mut entries = store.entries.write();
            for pair in pairs {
                entries.insert(pair.key, pair.value);
            }
        }
        store
    }

    /// Simulate the store going down (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Read a single key directly.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ConfigError::Unreachable(
                "memory store cannot be reached, this service is not available.".to_string(),
            ));
        }
        Ok(())
    }

    fn matching(&self, prefix: &str) -> Vec<KvPair> {
        self.entries
            .read()
            .iter()
            .filter(|(key, _)| path::relative_segments(prefix, key, KEY_DELIMITER).is_some())
            .map(|(key, value)| KvPair::new(key.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn get_keys_under_prefix(&self, key: &str) -> Result<Vec<String>> {
        self.check_reachable()?;
        Ok(self.matching(key).into_iter().map(|pair| pair.key).collect())
    }

    async fn get_all_under_prefix(&self, key: &str) -> Result<Vec<KvPair>> {
        self.check_reachable()?;
        Ok(self.matching(key))
    }

    async fn put_single(&self, key: &str, value: Value) -> Result<()> {
        self.check_reachable()?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn put_subtree(&self, key: &str, value: &Value) -> Result<()> {
        self.check_reachable()?;
        let pairs = codec::flatten(key, value)?;
        let mut entries = self.entries.write();
        for pair in pairs {
            entries.insert(pair.key, pair.value);
        }
        Ok(())
    }

    async fn delete_subtree(&self, key: &str) -> Result<()> {
        self.check_reachable()?;
        self.entries
            .write()
            .retain(|existing, _| path::relative_segments(key, existing, KEY_DELIMITER).is_none());
        Ok(())
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

//! The configuration client.

use super::builder::KeeperClientBuilder;
use crate::codec::{self, KEY_DELIMITER, path};
use crate::error::{ConfigError, Result};
use crate::notify::watch::Subscription;
use crate::notify::{ConfigUpdate, MessageBusInfo, NotificationTransport, TransportFactory};
use crate::store::{KvPair, KvStore};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[cfg(feature = "metrics")]
use crate::metrics::KeeperMetrics;

/// Section of the stored configuration describing the message bus.
const MESSAGE_QUEUE_SECTION: &str = "MessageQueue";

/// Client for one service's configuration in the key-value store.
///
/// All keys are addressed relative to the base path given at construction.
///
/// # Examples
///
/// ```rust,no_run
/// use keeper_config::prelude::*;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "PascalCase")]
/// struct Writable {
///     log_level: String,
/// }
///
/// # async fn example() -> Result<()> {
/// let client = KeeperClient::builder()
///     .with_url("http://localhost:59890")
///     .with_base_path("edgex/core/2.0/core-data")
///     .build()?;
///
/// if !client.has_configuration().await? {
///     client
///         .put_configuration(&Writable { log_level: "INFO".into() }, false)
///         .await?;
/// }
///
/// let mut writable = Writable::default();
/// client.get_configuration(&mut writable).await?;
/// # Ok(())
/// # }
/// ```
pub struct KeeperClient {
    store: Arc<dyn KvStore>,
    transport: Option<Arc<dyn TransportFactory>>,
    base_path: String,
    topic_prefix: String,
    watch_stops: Mutex<Vec<oneshot::Sender<()>>>,
    #[cfg(feature = "metrics")]
    metrics: Option<KeeperMetrics>,
}

impl KeeperClient {
    /// Create a builder.
    pub fn builder() -> KeeperClientBuilder {
        KeeperClientBuilder::new()
    }

    pub(crate) fn from_parts(
        store: Arc<dyn KvStore>,
        transport: Option<Arc<dyn TransportFactory>>,
        base_path: String,
        topic_prefix: String,
    ) -> Self {
        Self {
            store,
            transport,
            base_path,
            topic_prefix,
            watch_stops: Mutex::new(Vec::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn with_metrics(mut self, metrics: Option<KeeperMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The key prefix all configuration of this client lives under.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// The prefix change notification topics are published under.
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Whether the store answers a ping.
    pub async fn is_alive(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(store = %self.store.name(), error = %e, "store is not alive");
                false
            }
        }
    }

    /// Whether any key exists under the base path.
    pub async fn has_configuration(&self) -> Result<bool> {
        has_keys(self.store.as_ref(), &self.base_path).await
    }

    /// Whether any key exists under `name`, relative to the base path.
    pub async fn has_sub_configuration(&self, name: &str) -> Result<bool> {
        has_keys(self.store.as_ref(), &self.key(name)).await
    }

    /// Write `config` below the base path.
    ///
    /// With `overwrite`, the whole tree is written in one bulk request.
    /// Otherwise every leaf is written only if its key is absent. That mode
    /// checks and writes one leaf at a time: concurrent writers may both see
    /// a key as absent, and a failure part way leaves earlier leaves written.
    ///
    /// # Errors
    ///
    /// Returns the first store error. Already written leaves are not rolled
    /// back.
    pub async fn put_configuration<S>(&self, config: &S, overwrite: bool) -> Result<()>
    where
        S: Serialize + ?Sized,
    {
        let value = serde_json::to_value(config)?;

        if overwrite {
            tracing::debug!(base_path = %self.base_path, "writing configuration");
            return self.store.put_subtree(&self.base_path, &value).await;
        }

        let mut written = 0usize;
        for KvPair { key, value } in codec::flatten("", &value)? {
            if self.configuration_value_exists(&key).await? {
                tracing::debug!(key = %key, "keeping existing configuration value");
                continue;
            }
            self.store.put_single(&self.key(&key), value).await?;
            written += 1;
        }
        tracing::debug!(base_path = %self.base_path, written, "wrote missing configuration values");
        Ok(())
    }

    /// Parse `text` as TOML and write it like [`put_configuration`](Self::put_configuration).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Deserialization`] when `text` is not valid TOML.
    #[cfg(feature = "toml")]
    pub async fn put_configuration_toml(&self, text: &str, overwrite: bool) -> Result<()> {
        let table: toml::Table = toml::from_str(text)
            .map_err(|e| ConfigError::Deserialization(format!("Failed to parse TOML: {}", e)))?;
        self.put_configuration(&table, overwrite).await
    }

    /// Fetch the whole configuration and merge it onto `target`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ConfigurationNotFound`] when nothing is stored under
    ///   the base path
    /// - [`ConfigError::Decode`] / [`ConfigError::Deserialization`] when the
    ///   stored values don't fit `target`
    pub async fn get_configuration<T>(&self, target: &mut T) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let pairs = configuration_pairs(self.store.as_ref(), &self.base_path).await?;
        codec::decode(&self.base_path, &pairs, target)
    }

    /// Fetch the whole configuration into a default-constructed `T`.
    pub async fn load_configuration<T>(&self) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut target = T::default();
        self.get_configuration(&mut target).await?;
        Ok(target)
    }

    /// Start watching `wait_key` (relative to the base path) for changes.
    ///
    /// `target` has the shape of the watched subsection: with `wait_key`
    /// `"Writable"`, the stored key `<base>/Writable/LogLevel` lands on the
    /// target's `LogLevel` field. An empty `wait_key` watches the whole
    /// configuration with a full-configuration target.
    ///
    /// Runs in a background task on the current tokio runtime:
    ///
    /// 1. `target` is seeded with the stored pairs below `wait_key`.
    /// 2. The message bus described by the stored `MessageQueue` section is
    ///    connected and subscribed.
    /// 3. The first message is forwarded as [`ConfigUpdate::Established`].
    /// 4. Every later change below `wait_key` is merged onto `target` and the
    ///    result pushed as [`ConfigUpdate::Changed`].
    ///
    /// Setup failures are sent on `errors` and end the task. Errors while
    /// streaming are sent on `errors` and the session keeps going until
    /// [`stop_watching`](Self::stop_watching) is called or the client is
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn watch_for_changes<T>(
        &self,
        updates: mpsc::Sender<ConfigUpdate<T>>,
        errors: mpsc::Sender<ConfigError>,
        target: T,
        wait_key: &str,
    ) where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        let (stop_tx, stop) = oneshot::channel();
        {
            let mut stops = self.watch_stops.lock();
            stops.retain(|stop| !stop.is_closed());
            stops.push(stop_tx);
        }

        let setup = WatchSetup {
            store: Arc::clone(&self.store),
            transport: self.transport.clone(),
            base_path: self.base_path.clone(),
            topic: path::join_all([
                self.topic_prefix.as_str(),
                self.base_path.as_str(),
                wait_key,
                "#",
            ]),
            scope: path::join(&self.base_path, wait_key, KEY_DELIMITER),
            #[cfg(feature = "metrics")]
            metrics: self.metrics.clone(),
        };

        tokio::spawn(async move {
            let Some(subscription) = setup.establish(target, updates, errors, stop).await else {
                return;
            };
            match subscription.subscribe().await {
                Ok(session) => session.run().await,
                Err((e, errors)) => {
                    tracing::warn!(error = %e, "failed to subscribe for configuration changes");
                    let _ = errors.send(e).await;
                }
            }
        });
    }

    /// Stop every watch session started by this client.
    ///
    /// No update is pushed after this returns. Disconnecting from the bus
    /// happens asynchronously.
    pub fn stop_watching(&self) {
        let stops = std::mem::take(&mut *self.watch_stops.lock());
        tracing::debug!(sessions = stops.len(), "stopping configuration watch");
        for stop in stops {
            let _ = stop.send(());
        }
    }

    /// Whether `name` (relative to the base path) exists.
    pub async fn configuration_value_exists(&self, name: &str) -> Result<bool> {
        has_keys(self.store.as_ref(), &self.key(name)).await
    }

    /// Read the value stored at `name`, in its text form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotFound`] when nothing is stored there.
    pub async fn get_configuration_value(&self, name: &str) -> Result<Vec<u8>> {
        let key = self.key(name);
        let pairs = self.store.get_all_under_prefix(&key).await?;

        let pair = pairs
            .iter()
            .find(|pair| pair.key == key)
            .or_else(|| pairs.first())
            .ok_or_else(|| ConfigError::ValueNotFound(name.to_string()))?;
        Ok(codec::stringify(&pair.value).into_bytes())
    }

    /// Write a single value at `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when `value` is not UTF-8.
    pub async fn put_configuration_value(&self, name: &str, value: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(value)
            .map_err(|e| ConfigError::InvalidValue(format!("{} is not valid UTF-8: {}", name, e)))?;
        self.store
            .put_single(&self.key(name), Value::String(text.to_string()))
            .await
    }

    fn key(&self, name: &str) -> String {
        path::join(&self.base_path, name, KEY_DELIMITER)
    }
}

impl std::fmt::Debug for KeeperClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeeperClient")
            .field("store", &self.store.name())
            .field("base_path", &self.base_path)
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

async fn has_keys(store: &dyn KvStore, key: &str) -> Result<bool> {
    Ok(!store.get_keys_under_prefix(key).await?.is_empty())
}

async fn configuration_pairs(store: &dyn KvStore, base_path: &str) -> Result<Vec<KvPair>> {
    if !has_keys(store, base_path).await? {
        return Err(ConfigError::ConfigurationNotFound(base_path.to_string()));
    }
    store.get_all_under_prefix(base_path).await
}

/// What a background watch task needs from the client.
struct WatchSetup {
    store: Arc<dyn KvStore>,
    transport: Option<Arc<dyn TransportFactory>>,
    base_path: String,
    topic: String,
    scope: String,
    #[cfg(feature = "metrics")]
    metrics: Option<KeeperMetrics>,
}

impl WatchSetup {
    /// Seed the target and connect to the bus. Failures are reported on
    /// `errors`.
    async fn establish<T>(
        self,
        target: T,
        updates: mpsc::Sender<ConfigUpdate<T>>,
        errors: mpsc::Sender<ConfigError>,
        stop: oneshot::Receiver<()>,
    ) -> Option<Subscription<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        tracing::info!(scope = %self.scope, "establishing configuration watch");
        let connected = self.connect(target).await;
        match connected {
            Ok((target, transport)) => Some(Subscription {
                scope: self.scope,
                topic: self.topic,
                target,
                transport,
                updates,
                errors,
                stop,
                #[cfg(feature = "metrics")]
                metrics: self.metrics,
            }),
            Err(e) => {
                tracing::warn!(scope = %self.scope, error = %e, "failed to establish configuration watch");
                let _ = errors.send(e).await;
                None
            }
        }
    }

    async fn connect<T>(
        &self,
        mut target: T,
    ) -> Result<(T, Box<dyn NotificationTransport>)>
    where
        T: Serialize + DeserializeOwned,
    {
        let factory = self.transport.as_ref().ok_or_else(|| {
            ConfigError::MessageBus("no notification transport configured".to_string())
        })?;

        let pairs = configuration_pairs(self.store.as_ref(), &self.base_path).await?;
        codec::decode(&self.scope, &pairs, &mut target)?;

        let mut info = MessageBusInfo::default();
        let section = path::join(&self.base_path, MESSAGE_QUEUE_SECTION, KEY_DELIMITER);
        codec::decode(&section, &pairs, &mut info)?;
        info.validate()?;
        let info = info.with_unique_client_id();

        let mut transport = factory.create(&info)?;
        transport.connect().await?;
        tracing::debug!(host = %info.host, port = info.port, bus_type = %info.bus_type, "connected to message bus");

        Ok((target, transport))
    }
}

//! Builder for constructing KeeperClient instances.

use super::client::KeeperClient;
use super::settings::{DEFAULT_TOPIC_PREFIX, ServiceConfig};
use crate::error::{ConfigError, Result};
use crate::notify::TransportFactory;
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "http")]
use crate::store::HttpKvStore;

#[cfg(feature = "metrics")]
use crate::metrics::{InstrumentedStore, KeeperMetrics};

/// Builder for constructing a [`KeeperClient`].
///
/// Either a store (`with_store`) or a URL (`with_url`, `http` feature) is
/// required, as is a base path.
///
/// # Examples
///
/// ```rust,no_run
/// use keeper_config::prelude::*;
/// use std::time::Duration;
///
/// # fn example() -> Result<()> {
/// let client = KeeperClient::builder()
///     .with_url("http://localhost:59890")
///     .with_base_path("edgex/core/2.0/core-data")
///     .with_timeout(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KeeperClientBuilder {
    url: Option<String>,
    base_path: Option<String>,
    timeout: Option<Duration>,
    auth_token: Option<String>,
    store: Option<Arc<dyn KvStore>>,
    transport: Option<Arc<dyn TransportFactory>>,
    topic_prefix: String,
    #[cfg(feature = "metrics")]
    metrics: Option<KeeperMetrics>,
}

impl KeeperClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: None,
            base_path: None,
            timeout: None,
            auth_token: None,
            store: None,
            transport: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Take URL, timeout, topic prefix and (if set) base path from loaded
    /// settings.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use keeper_config::prelude::*;
    ///
    /// # fn example() -> Result<()> {
    /// let settings = ServiceConfig::load(Some("config/keeper.toml"), Some(("KEEPER", "__")))?;
    /// let client = KeeperClient::builder()
    ///     .with_service_config(&settings)
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_service_config(mut self, settings: &ServiceConfig) -> Self {
        self.url = Some(settings.url());
        self.timeout = Some(settings.timeout());
        self.topic_prefix = settings.topic_prefix.clone();
        if !settings.base_path.is_empty() {
            self.base_path = Some(settings.base_path.clone());
        }
        self
    }

    /// Set the store's base URL, e.g. `http://localhost:59890`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the key prefix of this service's configuration.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Set the store request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send a Bearer token with every store request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Use an existing store instead of building one from the URL.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the factory watch sessions create their message bus connection with.
    pub fn with_transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the prefix change notification topics are published under.
    ///
    /// Default is `edgex/configs`.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Enable OpenTelemetry metrics for store requests and watch sessions.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use keeper_config::prelude::*;
    /// use opentelemetry::global;
    ///
    /// # fn example() -> Result<()> {
    /// let client = KeeperClient::builder()
    ///     .with_url("http://localhost:59890")
    ///     .with_base_path("edgex/core/2.0/core-data")
    ///     .with_metrics(global::meter("my-service"))
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.metrics = Some(KeeperMetrics::new(meter));
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Other`] when the base path is missing, or when
    /// neither a store nor a URL was given. Building the HTTP store can fail
    /// as well.
    pub fn build(self) -> Result<KeeperClient> {
        let base_path = self
            .base_path
            .clone()
            .filter(|path| !path.is_empty())
            .ok_or_else(|| ConfigError::Other("No configuration base path specified".to_string()))?;

        let store = self.store()?;

        #[cfg(feature = "metrics")]
        let store: Arc<dyn KvStore> = match &self.metrics {
            Some(metrics) => Arc::new(InstrumentedStore::new(store, metrics.clone())),
            None => store,
        };

        tracing::debug!(store = %store.name(), base_path = %base_path, "built configuration client");

        let client = KeeperClient::from_parts(store, self.transport, base_path, self.topic_prefix);
        #[cfg(feature = "metrics")]
        let client = client.with_metrics(self.metrics);
        Ok(client)
    }

    fn store(&self) -> Result<Arc<dyn KvStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }

        match &self.url {
            #[cfg(feature = "http")]
            Some(url) => {
                let mut builder = HttpKvStore::builder().with_url(url.clone());
                if let Some(timeout) = self.timeout {
                    builder = builder.with_timeout(timeout);
                }
                if let Some(token) = &self.auth_token {
                    builder = builder.with_auth_token(token.clone());
                }
                Ok(Arc::new(builder.build()?))
            }
            #[cfg(not(feature = "http"))]
            Some(_) => Err(ConfigError::Other(
                "A store URL requires the 'http' feature".to_string(),
            )),
            None => Err(ConfigError::Other(
                "No store specified, use with_store or with_url".to_string(),
            )),
        }
    }
}

impl Default for KeeperClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Settings used to reach the configuration service.

use crate::error::{ConfigError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default topic prefix change notifications are published under.
pub const DEFAULT_TOPIC_PREFIX: &str = "edgex/configs";

/// Where the configuration service lives and which part of it this client owns.
///
/// Every field has a default, so an empty file (or no file at all) yields a
/// client pointed at `http://localhost:59890`.
///
/// # Examples
///
/// ```rust,no_run
/// use keeper_config::core::ServiceConfig;
///
/// # fn example() -> keeper_config::error::Result<()> {
/// // KEEPER_HOST=keeper.local overrides the file
/// let settings = ServiceConfig::load(Some("config/keeper.yaml"), Some(("KEEPER", "__")))?;
/// println!("{}", settings.url());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Store host name
    pub host: String,
    /// Store port
    pub port: u16,
    /// `http` or `https`
    pub protocol: String,
    /// Key prefix of this service's configuration
    pub base_path: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Prefix of change notification topics
    pub topic_prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 59890,
            protocol: "http".to_string(),
            base_path: String::new(),
            timeout_ms: 10_000,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load settings from an optional file, overridden by environment
    /// variables.
    ///
    /// The file format is picked from its extension (YAML, TOML or JSON).
    /// With `env = Some(("KEEPER", "__"))`, `KEEPER_BASE_PATH` sets
    /// `base_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Settings`] if the file cannot be read or a value
    /// has the wrong type.
    pub fn load<P: AsRef<Path>>(file: Option<P>, env: Option<(&str, &str)>) -> Result<Self> {
        let path: Option<&Path> = file.as_ref().map(|path| path.as_ref());
        let environment = env.map(|(prefix, separator)| {
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator(separator)
                .try_parsing(true)
        });
        Self::load_layers(path, environment)
    }

    fn load_layers(file: Option<&Path>, environment: Option<Environment>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "loading client settings");
            builder = builder.add_source(File::from(path).required(true));
        }
        if let Some(environment) = environment {
            builder = builder.add_source(environment);
        }

        let settings = builder
            .build()
            .map_err(|e| ConfigError::Settings(format!("Failed to build settings: {}", e)))?;

        settings.try_deserialize::<Self>().map_err(|e| {
            ConfigError::Settings(format!("Failed to deserialize settings: {}", e))
        })
    }

    /// Base URL of the store, `protocol://host:port`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

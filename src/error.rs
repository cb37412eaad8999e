//! Error types for keeper-config.

/// Result type alias for keeper-config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when talking to the configuration store or the message bus.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The store (or the notification bus) could not be reached at all.
    #[error("{0}")]
    Unreachable(String),

    /// The store answered a read request with a non-success status.
    #[error("Store read failed with status {status}: {message}")]
    StoreRead {
        /// HTTP status reported by the store
        status: u16,
        /// Message from the store's error body
        message: String,
    },

    /// The store answered a write or delete request with a non-success status.
    #[error("Store write failed with status {status}: {message}")]
    StoreWrite {
        /// HTTP status reported by the store
        status: u16,
        /// Message from the store's error body
        message: String,
    },

    /// A stored value could not be coerced into the target's declared type.
    #[error("Failed to decode '{path}': expected {expected}")]
    Decode {
        /// Full key path of the offending pair
        path: String,
        /// Type the target declares at that position
        expected: String,
    },

    /// The merged configuration could not be deserialized into the target type.
    #[error("Failed to deserialize configuration: {0}")]
    Deserialization(String),

    /// No keys exist under the configuration base path.
    #[error("The configuration store doesn't contain configuration for {0}")]
    ConfigurationNotFound(String),

    /// A single configuration value does not exist.
    #[error("{0} configuration not found")]
    ValueNotFound(String),

    /// A key segment cannot be encoded as a key path.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// The offending key or segment
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// A value handed to the client is not usable (e.g. non UTF-8 bytes).
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Message bus setup failed, or the bus reported an error while streaming.
    #[error("Message bus error: {0}")]
    MessageBus(String),

    /// Failed to load the client's own settings.
    #[error("Failed to load settings: {0}")]
    Settings(String),

    /// Generic error for other cases.
    #[error("Configuration error: {0}")]
    Other(String),
}

impl ConfigError {
    /// Create a decode error for a path and the type the target expected there.
    pub fn decode(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            expected: expected.into(),
        }
    }

    /// Whether the error means the store could not be contacted.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Deserialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_names_path_and_type() {
        let err = ConfigError::decode("svc/Writable/Port", "integer");
        assert_eq!(
            err.to_string(),
            "Failed to decode 'svc/Writable/Port': expected integer"
        );
    }

    #[test]
    fn test_is_unreachable() {
        assert!(ConfigError::Unreachable("down".into()).is_unreachable());
        assert!(!ConfigError::Other("x".into()).is_unreachable());
    }
}

//! HTTP gateway to the remote key-value store.

use super::{KvPair, KvStore};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header::HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// API base of the store's REST surface.
pub const API_BASE: &str = "/api/v2";
/// Route of the key-value endpoints.
pub const API_KV_ROUTE: &str = "/api/v2/kvs/key";
/// Route of the liveness endpoint.
pub const API_PING_ROUTE: &str = "/api/v2/ping";

const FLATTEN: &str = "flatten";
const KEY_ONLY: &str = "keyOnly";
const PLAINTEXT: &str = "plaintext";
const PREFIX_MATCH: &str = "prefixMatch";

/// Authentication method for HTTP requests.
#[derive(Clone)]
pub enum HttpAuth {
    /// No authentication
    None,
    /// Bearer token authentication
    Bearer(String),
    /// Basic authentication (username, password)
    Basic(String, String),
}

/// Error body returned by the store on non-success responses.
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "statusCode")]
    status_code: u16,
}

#[derive(Debug, Default, Deserialize)]
struct MultiKvResponse {
    #[serde(default)]
    response: Option<Vec<KvPair>>,
}

#[derive(Debug, Default, Deserialize)]
struct MultiKeyResponse {
    #[serde(default)]
    response: Option<Vec<String>>,
}

#[derive(Serialize)]
struct AddKeysRequest<'a> {
    value: &'a Value,
}

/// Which kind of operation a response belongs to, for error mapping.
#[derive(Clone, Copy)]
enum Operation {
    Read,
    Write,
}

/// Key-value store reached over HTTP.
///
/// # Examples
///
/// ```rust,no_run
/// use keeper_config::store::{HttpKvStore, KvStore};
/// use std::time::Duration;
///
/// # async fn example() -> keeper_config::error::Result<()> {
/// let store = HttpKvStore::builder()
///     .with_url("http://localhost:59890")
///     .with_timeout(Duration::from_secs(5))
///     .build()?;
///
/// store.ping().await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpKvStore {
    base_url: String,
    client: Client,
    auth: HttpAuth,
}

impl HttpKvStore {
    /// Create a new builder for constructing an HTTP store.
    pub fn builder() -> HttpKvStoreBuilder {
        HttpKvStoreBuilder::new()
    }

    /// The store's base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}{}/{}", self.base_url, API_KV_ROUTE, key.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match &self.auth {
            HttpAuth::None => request,
            HttpAuth::Bearer(token) => {
                let header_value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ConfigError::Other(format!("Invalid bearer token: {}", e)))?;
                request.header("Authorization", header_value)
            }
            HttpAuth::Basic(username, password) => request.basic_auth(username, Some(password)),
        })
    }

    /// Send a request, turning transport failures into `Unreachable`.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = self.authorize(request)?;
        request.send().await.map_err(|e| {
            tracing::debug!(error = %e, store = %self.base_url, "store request failed");
            ConfigError::Unreachable(format!(
                "{} cannot be reached, this service is not available.",
                self.base_url
            ))
        })
    }

    /// Map a non-success response to the matching error variant.
    async fn error_from(response: Response, operation: Operation) -> ConfigError {
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap_or_default();

        let status_code = if parsed.status_code != 0 {
            parsed.status_code
        } else {
            status.as_u16()
        };
        let message = if parsed.message.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            parsed.message
        };

        match operation {
            Operation::Read => ConfigError::StoreRead {
                status: status_code,
                message,
            },
            Operation::Write => ConfigError::StoreWrite {
                status: status_code,
                message,
            },
        }
    }

    /// Run a GET and parse the body, treating 404 as "no keys".
    async fn get_json<T>(&self, key: &str, flag: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request = self.client.get(self.key_url(key)).query(&[(flag, "true")]);
        let response = self.send(request).await?;

        let status = response.status();
        tracing::debug!(key, %status, "store read");
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(key, "no keys under prefix");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::error_from(response, Operation::Read).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ConfigError::Unreachable(format!("Failed to read response body: {}", e)))?;
        if body.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| ConfigError::Deserialization(format!("failed to parse the response body: {}", e)))
    }

    async fn put(&self, key: &str, value: &Value, flatten: bool) -> Result<()> {
        let mut request = self
            .client
            .put(self.key_url(key))
            .json(&AddKeysRequest { value });
        if flatten {
            request = request.query(&[(FLATTEN, "true")]);
        }

        let response = self.send(request).await?;
        let status = response.status();
        tracing::debug!(key, %status, flatten, "store write");
        if !status.is_success() {
            return Err(Self::error_from(response, Operation::Write).await);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for HttpKvStore {
    async fn ping(&self) -> Result<()> {
        let request = self.client.get(format!("{}{}", self.base_url, API_PING_ROUTE));
        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let err = Self::error_from(response, Operation::Read).await;
            return Err(ConfigError::Unreachable(err.to_string()));
        }
        Ok(())
    }

    async fn get_keys_under_prefix(&self, key: &str) -> Result<Vec<String>> {
        let response: Option<MultiKeyResponse> = self.get_json(key, KEY_ONLY).await?;
        Ok(response.and_then(|r| r.response).unwrap_or_default())
    }

    async fn get_all_under_prefix(&self, key: &str) -> Result<Vec<KvPair>> {
        let response: Option<MultiKvResponse> = self.get_json(key, PLAINTEXT).await?;
        Ok(response.and_then(|r| r.response).unwrap_or_default())
    }

    async fn put_single(&self, key: &str, value: Value) -> Result<()> {
        self.put(key, &value, false).await
    }

    async fn put_subtree(&self, key: &str, value: &Value) -> Result<()> {
        self.put(key, value, true).await
    }

    async fn delete_subtree(&self, key: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.key_url(key))
            .query(&[(PREFIX_MATCH, "true")]);
        let response = self.send(request).await?;

        let status = response.status();
        tracing::debug!(key, %status, "store delete");
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !status.is_success() {
            return Err(Self::error_from(response, Operation::Write).await);
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("http:{}", self.base_url)
    }
}

/// Builder for constructing an `HttpKvStore`.
///
/// # Examples
///
/// ```rust,no_run
/// use keeper_config::store::HttpKvStore;
/// use std::time::Duration;
///
/// # fn example() -> keeper_config::error::Result<()> {
/// let store = HttpKvStore::builder()
///     .with_url("https://keeper.example.com:59890")
///     .with_auth_token("secret-token")
///     .with_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct HttpKvStoreBuilder {
    url: Option<String>,
    auth: HttpAuth,
    timeout: Duration,
}

impl HttpKvStoreBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: None,
            auth: HttpAuth::None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the store's base URL (scheme, host and port).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set Bearer token authentication.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth = HttpAuth::Bearer(token.into());
        self
    }

    /// Set Basic authentication.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = HttpAuth::Basic(username.into(), password.into());
        self
    }

    /// Set the request timeout.
    ///
    /// Default is 10 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the HTTP store.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL is provided or the HTTP client cannot be
    /// constructed.
    pub fn build(self) -> Result<HttpKvStore> {
        let url = self
            .url
            .ok_or_else(|| ConfigError::Other("URL is required for HttpKvStore".to_string()))?;

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConfigError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpKvStore {
            base_url: url.trim_end_matches('/').to_string(),
            client,
            auth: self.auth,
        })
    }
}

impl Default for HttpKvStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

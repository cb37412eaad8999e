//! Store and watch metrics using OpenTelemetry.

use crate::error::Result;
use crate::store::{KvPair, KvStore};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for store and watch operations.
///
/// # Examples
///
/// ```rust,no_run
/// use keeper_config::metrics::KeeperMetrics;
/// use opentelemetry::global;
///
/// let metrics = KeeperMetrics::new(global::meter("keeper-config"));
///
/// let timer = metrics.start_request();
/// // ... talk to the store ...
/// metrics.record_request("get", timer, true);
/// ```
#[derive(Clone)]
pub struct KeeperMetrics {
    store_requests: Counter<u64>,
    store_failures: Counter<u64>,
    store_duration: Histogram<f64>,
    watch_updates: Counter<u64>,
    watch_errors: Counter<u64>,
    watch_dropped: Counter<u64>,
}

impl KeeperMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let store_requests = meter
            .u64_counter("keeper_config.store.requests")
            .with_description("Total number of store requests")
            .build();

        let store_failures = meter
            .u64_counter("keeper_config.store.failures")
            .with_description("Number of failed store requests")
            .build();

        let store_duration = meter
            .f64_histogram("keeper_config.store.duration")
            .with_description("Duration of store requests in seconds")
            .with_unit("s")
            .build();

        let watch_updates = meter
            .u64_counter("keeper_config.watch.updates")
            .with_description("Configuration changes forwarded by watch sessions")
            .build();

        let watch_errors = meter
            .u64_counter("keeper_config.watch.errors")
            .with_description("Errors reported by watch sessions")
            .build();

        let watch_dropped = meter
            .u64_counter("keeper_config.watch.dropped")
            .with_description("Notifications dropped as irrelevant or malformed")
            .build();

        Self {
            store_requests,
            store_failures,
            store_duration,
            watch_updates,
            watch_errors,
            watch_dropped,
        }
    }

    /// Start timing a store request.
    pub fn start_request(&self) -> Instant {
        Instant::now()
    }

    /// Record a finished store request.
    pub fn record_request(&self, operation: &'static str, start: Instant, success: bool) {
        let attributes = [KeyValue::new("operation", operation)];
        self.store_requests.add(1, &attributes);
        self.store_duration
            .record(start.elapsed().as_secs_f64(), &attributes);
        if !success {
            self.store_failures.add(1, &attributes);
        }
    }

    /// Record a change forwarded on a watch update channel.
    pub fn record_watch_update(&self) {
        self.watch_updates.add(1, &[]);
    }

    /// Record an error reported on a watch error channel.
    pub fn record_watch_error(&self) {
        self.watch_errors.add(1, &[]);
    }

    /// Record a notification the watch dropped.
    pub fn record_watch_dropped(&self) {
        self.watch_dropped.add(1, &[]);
    }
}

/// A [`KvStore`] wrapper recording every request in [`KeeperMetrics`].
pub struct InstrumentedStore {
    inner: Arc<dyn KvStore>,
    metrics: KeeperMetrics,
}

impl InstrumentedStore {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn KvStore>, metrics: KeeperMetrics) -> Self {
        Self { inner, metrics }
    }

    fn observe<T>(&self, operation: &'static str, start: Instant, result: Result<T>) -> Result<T> {
        self.metrics
            .record_request(operation, start, result.is_ok());
        result
    }
}

#[async_trait]
impl KvStore for InstrumentedStore {
    async fn ping(&self) -> Result<()> {
        let start = self.metrics.start_request();
        let result = self.inner.ping().await;
        self.observe("ping", start, result)
    }

    async fn get_keys_under_prefix(&self, key: &str) -> Result<Vec<String>> {
        let start = self.metrics.start_request();
        let result = self.inner.get_keys_under_prefix(key).await;
        self.observe("keys", start, result)
    }

    async fn get_all_under_prefix(&self, key: &str) -> Result<Vec<KvPair>> {
        let start = self.metrics.start_request();
        let result = self.inner.get_all_under_prefix(key).await;
        self.observe("get", start, result)
    }

    async fn put_single(&self, key: &str, value: Value) -> Result<()> {
        let start = self.metrics.start_request();
        let result = self.inner.put_single(key, value).await;
        self.observe("put", start, result)
    }

    async fn put_subtree(&self, key: &str, value: &Value) -> Result<()> {
        let start = self.metrics.start_request();
        let result = self.inner.put_subtree(key, value).await;
        self.observe("put_subtree", start, result)
    }

    async fn delete_subtree(&self, key: &str) -> Result<()> {
        let start = self.metrics.start_request();
        let result = self.inner.delete_subtree(key).await;
        self.observe("delete", start, result)
    }

    fn name(&self) -> String {
        self.inner.name()
    }
}

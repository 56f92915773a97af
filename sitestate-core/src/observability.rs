/*!
Observability for the build-state store.

- Structured logging through `tracing-subscriber`, as JSON or plain text
- Prometheus counters for dispatches and snapshot traffic (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, StoreError};

/// Filter applied when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "sitestate=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<StoreMetrics> = OnceLock::new();

/// Metrics collected by the store and the snapshot codec
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct StoreMetrics {
    pub dispatch_total: Counter,
    pub snapshot_saves_total: Counter,
    pub snapshot_load_failures_total: Counter,
    pub snapshot_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl StoreMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let dispatch_total = Counter::new(
            "sitestate_dispatch_total",
            "Total actions applied to the build state",
        )
        .map_err(|e| StoreError::storage(format!("Failed to create dispatch_total metric: {e}")))?;

        let snapshot_saves_total = Counter::new(
            "sitestate_snapshot_saves_total",
            "Total build-state snapshots written",
        )
        .map_err(|e| {
            StoreError::storage(format!("Failed to create snapshot_saves_total metric: {e}"))
        })?;

        let snapshot_load_failures_total = Counter::new(
            "sitestate_snapshot_load_failures_total",
            "Cached snapshots discarded because they could not be read",
        )
        .map_err(|e| {
            StoreError::storage(format!(
                "Failed to create snapshot_load_failures_total metric: {e}"
            ))
        })?;

        let snapshot_size_bytes = Histogram::with_opts(HistogramOpts::new(
            "sitestate_snapshot_size_bytes",
            "Size of written snapshots in bytes",
        ))
        .map_err(|e| {
            StoreError::storage(format!("Failed to create snapshot_size_bytes metric: {e}"))
        })?;

        registry
            .register(Box::new(dispatch_total.clone()))
            .map_err(|e| StoreError::storage(format!("Failed to register dispatch_total: {e}")))?;
        registry
            .register(Box::new(snapshot_saves_total.clone()))
            .map_err(|e| {
                StoreError::storage(format!("Failed to register snapshot_saves_total: {e}"))
            })?;
        registry
            .register(Box::new(snapshot_load_failures_total.clone()))
            .map_err(|e| {
                StoreError::storage(format!(
                    "Failed to register snapshot_load_failures_total: {e}"
                ))
            })?;
        registry
            .register(Box::new(snapshot_size_bytes.clone()))
            .map_err(|e| {
                StoreError::storage(format!("Failed to register snapshot_size_bytes: {e}"))
            })?;

        Ok(Self {
            dispatch_total,
            snapshot_saves_total,
            snapshot_load_failures_total,
            snapshot_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> &'static StoreMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize store metrics"))
    }

    pub fn record_dispatch(&self) {
        self.dispatch_total.inc();
    }

    pub fn record_save(&self, size_bytes: usize) {
        self.snapshot_saves_total.inc();
        self.snapshot_size_bytes.observe(size_bytes as f64);
    }

    pub fn record_load_failure(&self) {
        self.snapshot_load_failures_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| StoreError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| StoreError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over [`DEFAULT_LOG_DIRECTIVE`]. With `json`
/// set, events are emitted as one JSON object per line.
///
/// # Errors
/// * `StoreError::Config` - If a subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    StoreMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_target(false));

    let subscriber = TracingRegistry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    set_global_default(subscriber).map_err(|e| {
        StoreError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Build-state observability initialized");
    Ok(())
}

/// Initialize observability with JSON output
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}

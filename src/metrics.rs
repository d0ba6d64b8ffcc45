//! Prometheus metrics for enrichment runs.
//!
//! Compiled only with the `metrics` feature. The `metrics` facade counters emitted by the
//! client and runner are always on; this registry is for callers that expose a scrape
//! endpoint and want per-operation gauges and histograms.
//!
//! - **Gauges**: items currently being processed
//! - **Counters**: items finished by status, rate-limited retries
//! - **Histograms**: item duration

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry};
#[cfg(feature = "metrics")]
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::domain::item::ItemStatus;
#[cfg(feature = "metrics")]
use crate::eligibility::OperationKind;
#[cfg(feature = "metrics")]
use crate::error::Result;

/// Prometheus metrics for batch runs, labelled by operation.
#[cfg(feature = "metrics")]
#[derive(Clone)]
pub struct EnrichmentMetrics {
    registry: Registry,
    items_in_flight: GaugeVec,
    items_total: CounterVec,
    retries_total: CounterVec,
    item_duration_seconds: HistogramVec,
}

#[cfg(feature = "metrics")]
impl EnrichmentMetrics {
    /// Register all metrics with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric fails to register (e.g. registered twice).
    pub fn new(registry: Registry) -> Result<Self> {
        let items_in_flight = GaugeVec::new(
            Opts::new(
                "volley_items_in_flight",
                "Number of batch items currently being processed",
            ),
            &["operation"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create items_in_flight gauge: {}", e))?;

        let items_total = CounterVec::new(
            Opts::new(
                "volley_items_total",
                "Total number of batch items finished by status",
            ),
            &["operation", "status"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create items_total counter: {}", e))?;

        let retries_total = CounterVec::new(
            Opts::new(
                "volley_retries_total",
                "Total number of HTTP retries made for batch items",
            ),
            &["operation", "reason"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create retries_total counter: {}", e))?;

        // Buckets span a single fast call up to a fully backed-off rate-limited item
        let item_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "volley_item_duration_seconds",
                "Batch item processing duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
            &["operation"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create item_duration_seconds histogram: {}", e))?;

        registry
            .register(Box::new(items_in_flight.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register items_in_flight: {}", e))?;
        registry
            .register(Box::new(items_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register items_total: {}", e))?;
        registry
            .register(Box::new(retries_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register retries_total: {}", e))?;
        registry
            .register(Box::new(item_duration_seconds.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register item_duration_seconds: {}", e))?;

        Ok(Self {
            registry,
            items_in_flight,
            items_total,
            retries_total,
            item_duration_seconds,
        })
    }

    /// Underlying registry, for exporting over HTTP.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_items_in_flight(&self, operation: OperationKind, count: usize) {
        self.items_in_flight
            .with_label_values(&[operation.as_str()])
            .set(count as f64);
    }

    /// Record a finished item: its terminal status, its duration and any retries it needed.
    pub fn record_item(
        &self,
        operation: OperationKind,
        status: ItemStatus,
        attempts: u32,
        duration: Duration,
    ) {
        self.items_total
            .with_label_values(&[operation.as_str(), status.as_str()])
            .inc();

        self.item_duration_seconds
            .with_label_values(&[operation.as_str()])
            .observe(duration.as_secs_f64());

        // Only 429s are retried, so every attempt past the first is a rate-limit retry
        if attempts > 1 {
            self.retries_total
                .with_label_values(&[operation.as_str(), "rate_limit"])
                .inc_by(f64::from(attempts - 1));
        }
    }

    /// Record an eligible item that was never started because the run was cancelled.
    pub fn record_item_skipped(&self, operation: OperationKind) {
        self.items_total
            .with_label_values(&[operation.as_str(), "skipped"])
            .inc();
    }
}

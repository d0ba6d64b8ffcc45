//! Batch runner: drives an [`ItemOperation`] over the eligible items of a batch.
//!
//! ```text
//! items ──filter_eligible──> pending ──(pace)──> start ──execute──> succeeded | failed
//!                                                  │                       │
//!                                      cancel? ──> skipped       tally + on_progress
//! ```
//!
//! Items start in input order. With `max_concurrency == 1` (the default) each item finishes
//! before the next one starts and the pacing delay sits between them. With more slots the
//! delay is a gap between consecutive starts, so the aggregate request rate never exceeds
//! the sequential one. A single item's failure never aborts the run.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use metrics::counter;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::item::{AnyItem, BatchItem, Item, Pending};
use crate::eligibility::{OperationKind, filter_eligible};
use crate::error::Result;
#[cfg(feature = "metrics")]
use crate::metrics::EnrichmentMetrics;
use crate::operation::ItemOperation;

mod types;

pub use types::{BatchRunResult, RunId, RunnerConfig};

/// An item that has left the `Processing` state.
struct Finished {
    index: usize,
    item: AnyItem,
    duration: Duration,
}

/// Running counts for one run. Slots stay in input order.
struct Tally {
    slots: Vec<AnyItem>,
    processed: usize,
    succeeded: usize,
    failed: usize,
    persist_failed: usize,
}

impl Tally {
    fn new(slots: Vec<AnyItem>) -> Self {
        Self {
            slots,
            processed: 0,
            succeeded: 0,
            failed: 0,
            persist_failed: 0,
        }
    }

    fn record(&mut self, finished: Finished) -> usize {
        match &finished.item {
            AnyItem::Succeeded(_) => self.succeeded += 1,
            AnyItem::Failed(item) => {
                self.failed += 1;
                if item.state.reason.is_persist_failure() {
                    self.persist_failed += 1;
                }
            }
            AnyItem::Pending(_) | AnyItem::Processing(_) => {}
        }
        self.slots[finished.index] = finished.item;
        self.processed += 1;
        self.processed
    }
}

async fn process_item<O: ItemOperation + ?Sized>(
    operation: &O,
    index: usize,
    item: Item<Pending>,
) -> Finished {
    let started = Instant::now();
    let processing = item.start();

    let item = match operation.execute(&processing.data).await {
        Ok(output) => processing.succeed(output.content, output.attempts).into(),
        Err(failure) => processing.fail(failure.reason, failure.attempts).into(),
    };

    Finished {
        index,
        item,
        duration: started.elapsed(),
    }
}

/// Runs batches of items through an operation.
///
/// A runner holds no per-run state; it can be reused and shared across runs.
#[derive(Clone)]
pub struct BatchRunner {
    config: RunnerConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<EnrichmentMetrics>,
}

impl BatchRunner {
    pub fn new(config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Sequential runner with the usual pacing for `kind`.
    pub fn for_operation(kind: OperationKind) -> Self {
        Self {
            config: RunnerConfig::for_operation(kind),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Report item metrics to a Prometheus registry.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: EnrichmentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `operation` over the eligible items, calling `on_progress(processed, total)` after
    /// every finished item.
    ///
    /// # Errors
    ///
    /// [`VolleyError::EmptyBatch`](crate::VolleyError::EmptyBatch) or
    /// [`VolleyError::NoEligibleItems`](crate::VolleyError::NoEligibleItems) when there is
    /// nothing to do. Per-item failures are reported in the result, never as an error.
    pub async fn run<O, F>(
        &self,
        items: &[BatchItem],
        operation: &O,
        on_progress: F,
    ) -> Result<BatchRunResult>
    where
        O: ItemOperation + ?Sized,
        F: FnMut(usize, usize),
    {
        self.run_cancellable(items, operation, on_progress, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops starting new items once `cancel` fires.
    ///
    /// Cancellation is checked between items only; an item already in flight (including its
    /// rate-limit retries) runs to its terminal state. Items never started are `skipped`.
    pub async fn run_cancellable<O, F>(
        &self,
        items: &[BatchItem],
        operation: &O,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<BatchRunResult>
    where
        O: ItemOperation + ?Sized,
        F: FnMut(usize, usize),
    {
        let kind = operation.kind();
        let eligible = filter_eligible(items, kind)?;
        let run_id = RunId::new();
        self.drive(run_id, kind, &eligible, operation, on_progress, cancel)
            .await
    }

    #[tracing::instrument(
        skip(self, run_id, kind, eligible, operation, on_progress, cancel),
        fields(run_id = %run_id, operation = %kind, total = eligible.len())
    )]
    async fn drive<O, F>(
        &self,
        run_id: RunId,
        kind: OperationKind,
        eligible: &[BatchItem],
        operation: &O,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<BatchRunResult>
    where
        O: ItemOperation + ?Sized,
        F: FnMut(usize, usize),
    {
        let total = eligible.len();
        let delay = Duration::from_millis(self.config.inter_item_delay_ms);
        let max_concurrency = self.config.max_concurrency;

        tracing::info!(
            max_concurrency,
            inter_item_delay_ms = self.config.inter_item_delay_ms,
            "Batch run starting"
        );

        let mut queue: Vec<Item<Pending>> = eligible.iter().map(BatchItem::to_pending).collect();
        let mut tally = Tally::new(queue.iter().cloned().map(AnyItem::from).collect());
        // Reversed so the next item in input order is popped from the back
        queue.reverse();

        let mut in_flight = FuturesUnordered::new();
        let mut started = 0usize;
        let mut cancelled = false;

        loop {
            let can_start = !cancelled && !queue.is_empty() && in_flight.len() < max_concurrency;

            if can_start {
                if !delay.is_zero() && (started > 0 || self.config.pace_first_item) {
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => break,
                            _ = cancel.cancelled() => break,
                            Some(finished) = in_flight.next(), if !in_flight.is_empty() => {
                                self.finish_item(kind, &finished);
                                let processed = tally.record(finished);
                                self.set_in_flight(kind, in_flight.len());
                                on_progress(processed, total);
                            }
                        }
                    }
                }

                if cancel.is_cancelled() {
                    tracing::info!(started, "Batch run cancelled, no further items will start");
                    cancelled = true;
                    continue;
                }

                let Some(item) = queue.pop() else {
                    continue;
                };
                in_flight.push(process_item(operation, started, item));
                started += 1;
                self.set_in_flight(kind, in_flight.len());
                continue;
            }

            match in_flight.next().await {
                Some(finished) => {
                    self.finish_item(kind, &finished);
                    let processed = tally.record(finished);
                    self.set_in_flight(kind, in_flight.len());
                    on_progress(processed, total);
                }
                None => break,
            }
        }

        let skipped = total - tally.processed;
        if skipped > 0 {
            counter!("volley_items_total", "operation" => kind.as_str(), "status" => "skipped")
                .increment(skipped as u64);
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                for _ in 0..skipped {
                    metrics.record_item_skipped(kind);
                }
            }
        }

        let result = BatchRunResult {
            run_id,
            operation: kind,
            total_eligible: total,
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped,
            persist_failed: tally.persist_failed,
            cancelled,
            per_item: tally.slots.into_iter().map(BatchItem::from).collect(),
        };

        tracing::info!(
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            persist_failed = result.persist_failed,
            "Batch run finished: {}",
            result.summary_message()
        );

        Ok(result)
    }

    fn finish_item(&self, kind: OperationKind, finished: &Finished) {
        let status = finished.item.status();
        let data = finished.item.data();

        match &finished.item {
            AnyItem::Succeeded(item) => {
                tracing::debug!(
                    owner_id = %data.owner_id,
                    attempts = item.state.attempts,
                    duration_ms = finished.duration.as_millis() as u64,
                    "Item succeeded"
                );
            }
            AnyItem::Failed(item) => {
                tracing::warn!(
                    owner_id = %data.owner_id,
                    identifier = %data.identifier,
                    attempts = item.state.attempts,
                    reason = item.state.reason.label(),
                    error = %item.state.reason.to_error_message(),
                    "Item failed"
                );
            }
            AnyItem::Pending(_) | AnyItem::Processing(_) => {}
        }

        counter!("volley_items_total", "operation" => kind.as_str(), "status" => status.as_str())
            .increment(1);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            let attempts = match &finished.item {
                AnyItem::Succeeded(item) => item.state.attempts,
                AnyItem::Failed(item) => item.state.attempts,
                AnyItem::Pending(_) | AnyItem::Processing(_) => 0,
            };
            metrics.record_item(kind, status, attempts, finished.duration);
        }
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn set_in_flight(&self, kind: OperationKind, count: usize) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.set_items_in_flight(kind, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, CredentialPool, RateLimitedApiClient};
    use crate::domain::content::ExtractedContent;
    use crate::domain::item::{FailureReason, ItemData, ItemStatus};
    use crate::http::{AuthScheme, HttpResponse, MockHttpClient};
    use crate::operation::{
        EnrichOperation, OperationFailure, OperationOutput, RequestTemplate, operation_fn,
    };
    use crate::store::{InMemoryRecordStore, RecordPersister};
    use crate::domain::record::Record;
    use crate::VolleyError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn items(n: usize) -> Vec<BatchItem> {
        (1..=n)
            .map(|i| BatchItem::new(format!("@creator{}", i), format!("rec-{}", i)))
            .collect()
    }

    fn echo() -> impl ItemOperation {
        operation_fn(OperationKind::TextGeneration, |item: ItemData| async move {
            Ok(OperationOutput {
                content: ExtractedContent::Text(item.identifier),
                attempts: 1,
            })
        })
    }

    fn fast_runner(max_concurrency: usize) -> BatchRunner {
        BatchRunner::new(RunnerConfig {
            inter_item_delay_ms: 0,
            pace_first_item: false,
            max_concurrency,
        })
        .unwrap()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = BatchRunner::new(RunnerConfig {
            max_concurrency: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(VolleyError::InvalidConfig(_))));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_partial_failure_is_isolated() {
        let mock = MockHttpClient::new();
        for i in 1..=5 {
            if i == 3 {
                mock.add_response(
                    "GET /user/info",
                    Err(VolleyError::Other(anyhow::anyhow!("connection reset"))),
                );
            } else {
                mock.add_response(
                    "GET /user/info",
                    Ok(HttpResponse::ok(
                        r#"{"userInfo":{"stats":{"followerCount":100,"heartCount":7}}}"#,
                    )),
                );
            }
        }

        let store = Arc::new(InMemoryRecordStore::new(
            (1..=5).map(|i| Record::new(format!("rec-{}", i))).collect(),
        ));
        let client = RateLimitedApiClient::new(
            mock.clone(),
            CredentialPool::new(vec!["k1".to_string()]).unwrap(),
            ClientConfig::default(),
        )
        .unwrap();
        let op = EnrichOperation::new(
            OperationKind::ProfileRefresh,
            client,
            RequestTemplate::get(
                "https://tiktok.example.com",
                "/user/info",
                AuthScheme::Header("x-rapidapi-key".to_string()),
            )
            .with_query("unique_id", "{identifier}"),
            RecordPersister::new(store.clone()),
        );

        let mut progress = Vec::new();
        let result = BatchRunner::for_operation(OperationKind::ProfileRefresh)
            .run(&items(5), &op, |done, total| progress.push((done, total)))
            .await
            .unwrap();

        assert_eq!(result.total_eligible, 5);
        assert_eq!(result.succeeded, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(progress, (1..=5).map(|i| (i, 5)).collect::<Vec<_>>());

        let third = &result.per_item[2];
        assert_eq!(third.current_status, ItemStatus::Failed);
        assert!(matches!(third.failure, Some(FailureReason::Transport { .. })));
        assert!(third.last_error.as_deref().unwrap().contains("connection reset"));
        let status = |id: &str| store.get(id).unwrap().status(OperationKind::ProfileRefresh);
        assert_eq!(status("rec-3"), ItemStatus::Pending);
        assert_eq!(status("rec-4"), ItemStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_pacing() {
        let runner = BatchRunner::for_operation(OperationKind::VideoListing);
        let start = Instant::now();
        let starts = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let op = {
            let starts = starts.clone();
            operation_fn(OperationKind::VideoListing, move |item: ItemData| {
                starts.lock().push(start.elapsed());
                async move {
                    Ok(OperationOutput {
                        content: ExtractedContent::Text(item.identifier),
                        attempts: 1,
                    })
                }
            })
        };

        runner.run(&items(3), &op, |_, _| {}).await.unwrap();

        let starts = starts.lock().clone();
        assert_eq!(starts[0], Duration::ZERO);
        assert_eq!(starts[1], Duration::from_millis(1500));
        assert_eq!(starts[2], Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_first_item() {
        let runner = BatchRunner::new(RunnerConfig {
            inter_item_delay_ms: 1000,
            pace_first_item: true,
            max_concurrency: 1,
        })
        .unwrap();
        let start = Instant::now();
        runner.run(&items(2), &echo(), |_, _| {}).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_text_generation_rerun_skips_succeeded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = {
            let calls = calls.clone();
            operation_fn(OperationKind::TextGeneration, move |item: ItemData| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(OperationOutput {
                        content: ExtractedContent::Text(format!("Hi {}", item.identifier)),
                        attempts: 1,
                    })
                }
            })
        };

        let runner = fast_runner(1);
        let first = runner.run(&items(3), &op, |_, _| {}).await.unwrap();
        assert_eq!(first.succeeded, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Feed the reported states back in: nothing left to generate
        let rerun = runner.run(&first.per_item, &op, |_, _| {}).await;
        assert!(matches!(
            rerun,
            Err(VolleyError::NoEligibleItems {
                operation: OperationKind::TextGeneration
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_eligible_items_makes_no_calls() {
        let mock = MockHttpClient::new();
        let client = RateLimitedApiClient::new(
            mock.clone(),
            CredentialPool::new(vec!["k1".to_string()]).unwrap(),
            ClientConfig::default(),
        )
        .unwrap();
        let store = Arc::new(InMemoryRecordStore::default());
        let op = EnrichOperation::new(
            OperationKind::ProfileRefresh,
            client,
            RequestTemplate::get("https://x", "/user/info", AuthScheme::Bearer),
            RecordPersister::new(store),
        );

        let batch = vec![BatchItem::new("", "rec-1"), BatchItem::new("  ", "rec-2")];
        let mut progress_calls = 0;
        let result = fast_runner(1)
            .run(&batch, &op, |_, _| progress_calls += 1)
            .await;

        assert!(matches!(result, Err(VolleyError::NoEligibleItems { .. })));
        assert_eq!(mock.call_count(), 0);
        assert_eq!(progress_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_skips_remaining_items() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result = BatchRunner::for_operation(OperationKind::TextGeneration)
            .run_cancellable(
                &items(5),
                &echo(),
                |done, _| {
                    if done == 2 {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.skipped, 3);
        assert!(result.is_consistent());
        assert_eq!(result.per_item[4].current_status, ItemStatus::Pending);
        assert_eq!(result.summary_message(), "2 succeeded, 0 failed, 3 skipped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_pacing_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = BatchRunner::for_operation(OperationKind::VideoListing)
            .run_cancellable(&items(3), &echo(), |_, _| {}, &cancel)
            .await
            .unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.skipped, 2);
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_order_and_monotonic_progress() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let op = {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            operation_fn(OperationKind::ProfileRefresh, move |item: ItemData| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Later items finish first
                    let n: u64 = item.identifier.trim_start_matches("@creator").parse().unwrap();
                    tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);

                    if n == 4 {
                        return Err(OperationFailure::other("boom", 1));
                    }
                    Ok(OperationOutput {
                        content: ExtractedContent::Text(item.identifier),
                        attempts: 1,
                    })
                }
            })
        };

        let mut progress = Vec::new();
        let result = fast_runner(3)
            .run(&items(8), &op, |done, total| progress.push((done, total)))
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(progress, (1..=8).map(|i| (i, 8)).collect::<Vec<_>>());
        assert_eq!(result.succeeded, 7);
        assert_eq!(result.failed, 1);

        let owners: Vec<&str> = result.per_item.iter().map(|i| i.owner_id.as_str()).collect();
        assert_eq!(
            owners,
            (1..=8).map(|i| format!("rec-{}", i)).collect::<Vec<_>>()
        );
        assert_eq!(result.per_item[3].current_status, ItemStatus::Failed);
    }

    #[tokio::test]
    async fn test_persist_failures_counted_separately() {
        let op = operation_fn(OperationKind::TextGeneration, |item: ItemData| async move {
            if item.owner_id == "rec-2" {
                return Err(OperationFailure::new(
                    FailureReason::Persist {
                        error: "write rejected".to_string(),
                    },
                    1,
                ));
            }
            Ok(OperationOutput {
                content: ExtractedContent::Text(item.identifier),
                attempts: 1,
            })
        });

        let result = fast_runner(1).run(&items(3), &op, |_, _| {}).await.unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.persist_failed, 1);
        assert_eq!(
            result.persist_failures().map(|i| i.owner_id.as_str()).collect::<Vec<_>>(),
            vec!["rec-2"]
        );
        assert_eq!(result.summary_message(), "2 succeeded, 1 failed (1 not saved)");
    }
}

//! Batch enrichment of records from rate-limited third-party APIs.
//!
//! A caller supplies a batch of items (a social handle or record id plus the record that owns
//! it) and an operation. The [`BatchRunner`] narrows the batch to eligible items, runs the
//! operation for each one with pacing, and reports progress after every item. The usual
//! operation, [`EnrichOperation`], calls the API through a [`RateLimitedApiClient`] that
//! rotates credentials and backs off on HTTP 429, normalizes the payload into
//! [`ExtractedContent`] and writes it back through a [`ResultPersister`].
//!
//! A failed item never aborts its batch: the final [`BatchRunResult`] accounts for every
//! eligible item.

pub mod client;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod extract;
pub mod http;
pub mod metrics;
pub mod operation;
pub mod runner;
pub mod store;

// Re-export commonly used types
pub use client::{ClientConfig, CredentialPool, RateLimitedApiClient, RawResponse};
pub use domain::content::{ExtractedContent, Metrics, VideoSummary};
pub use domain::item::{BatchItem, FailureReason, ItemData, ItemStatus};
pub use domain::record::{Record, RecordFilter, RecordUpdate};
pub use eligibility::{OperationKind, filter_eligible};
pub use error::{CallError, ExtractionError, PersistError, Result, VolleyError};
pub use http::{ApiRequest, AuthScheme, HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
#[cfg(feature = "metrics")]
pub use metrics::EnrichmentMetrics;
pub use operation::{
    EnrichOperation, ItemOperation, OperationFailure, OperationOutput, RequestTemplate,
    operation_fn,
};
pub use runner::{BatchRunResult, BatchRunner, RunId, RunnerConfig};
pub use store::{InMemoryRecordStore, RecordPersister, RecordStore, ResultPersister, load_items};

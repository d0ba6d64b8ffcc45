//! Per-item operations driven by the batch runner.
//!
//! Every bulk feature (profile refresh, video listing, text generation) is an
//! [`ItemOperation`]. The usual one is [`EnrichOperation`]: render a request for the item,
//! call the API through the [`RateLimitedApiClient`], extract the payload and write the
//! result back through a [`ResultPersister`]. Ad-hoc operations can be built from a closure
//! with [`operation_fn`].

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{RateLimitedApiClient, RawResponse};
use crate::domain::content::ExtractedContent;
use crate::domain::item::{FailureReason, ItemData};
use crate::eligibility::OperationKind;
use crate::error::{CallError, ExtractionError};
use crate::extract::{extract_metrics, extract_text, extract_videos};
use crate::http::{ApiRequest, AuthScheme, HttpClient};
use crate::store::ResultPersister;

/// Placeholder substituted with the item identifier when rendering a [`RequestTemplate`].
pub const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

/// Result of a successful item operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutput {
    pub content: ExtractedContent,
    /// HTTP attempts made, including rate-limited retries
    pub attempts: u32,
}

/// Failure of an item operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    pub reason: FailureReason,
    pub attempts: u32,
}

impl OperationFailure {
    pub fn new(reason: FailureReason, attempts: u32) -> Self {
        Self { reason, attempts }
    }

    /// Failure raised by caller code rather than by the pipeline.
    pub fn other(error: impl std::fmt::Display, attempts: u32) -> Self {
        Self::new(
            FailureReason::Operation {
                error: error.to_string(),
            },
            attempts,
        )
    }
}

impl From<CallError> for OperationFailure {
    fn from(err: CallError) -> Self {
        let attempts = err.attempts();
        Self::new(err.into(), attempts)
    }
}

/// Work performed for one item of a batch.
///
/// Implementations report every failure through [`OperationFailure`]; the runner records it on
/// the item and moves on.
#[async_trait]
pub trait ItemOperation: Send + Sync {
    /// Operation kind, which decides eligibility and default pacing.
    fn kind(&self) -> OperationKind;

    async fn execute(&self, item: &ItemData) -> Result<OperationOutput, OperationFailure>;
}

/// An [`ItemOperation`] backed by a closure.
pub struct FnOperation<F> {
    kind: OperationKind,
    f: F,
}

/// Build an operation from an async closure.
///
/// ```ignore
/// let op = operation_fn(OperationKind::TextGeneration, |item: ItemData| async move {
///     Ok(OperationOutput { content: ExtractedContent::Text(item.identifier), attempts: 1 })
/// });
/// ```
pub fn operation_fn<F, Fut>(kind: OperationKind, f: F) -> FnOperation<F>
where
    F: Fn(ItemData) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OperationOutput, OperationFailure>> + Send + 'static,
{
    FnOperation { kind, f }
}

#[async_trait]
impl<F, Fut> ItemOperation for FnOperation<F>
where
    F: Fn(ItemData) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OperationOutput, OperationFailure>> + Send + 'static,
{
    fn kind(&self) -> OperationKind {
        self.kind
    }

    async fn execute(&self, item: &ItemData) -> Result<OperationOutput, OperationFailure> {
        (self.f)(item.clone()).await
    }
}

/// Request shape shared by every item of an operation.
///
/// `{identifier}` in the path, query values and body is replaced by the item identifier.
/// Inside the body the identifier is JSON-escaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: String,
    pub base_url: String,
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    pub auth: AuthScheme,
}

impl RequestTemplate {
    pub fn get(base_url: impl Into<String>, path: impl Into<String>, auth: AuthScheme) -> Self {
        Self {
            method: "GET".to_string(),
            base_url: base_url.into(),
            path: path.into(),
            query: Vec::new(),
            body: None,
            auth,
        }
    }

    pub fn post(
        base_url: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<String>,
        auth: AuthScheme,
    ) -> Self {
        Self {
            method: "POST".to_string(),
            body: Some(body.into()),
            ..Self::get(base_url, path, auth)
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn render(&self, identifier: &str) -> ApiRequest {
        let quoted = serde_json::Value::String(identifier.to_string()).to_string();
        let escaped = &quoted[1..quoted.len() - 1];

        ApiRequest {
            method: self.method.clone(),
            base_url: self.base_url.clone(),
            path: self
                .path
                .replace(IDENTIFIER_PLACEHOLDER, &encode_path_segment(identifier)),
            endpoint: Some(self.path.clone()),
            query: self
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.replace(IDENTIFIER_PLACEHOLDER, identifier)))
                .collect(),
            body: self
                .body
                .as_ref()
                .map(|b| b.replace(IDENTIFIER_PLACEHOLDER, escaped)),
            auth: self.auth.clone(),
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Fetch, extract and persist one item.
pub struct EnrichOperation<H: HttpClient, P: ResultPersister> {
    kind: OperationKind,
    client: RateLimitedApiClient<H>,
    template: RequestTemplate,
    persister: P,
}

impl<H: HttpClient, P: ResultPersister> EnrichOperation<H, P> {
    pub fn new(
        kind: OperationKind,
        client: RateLimitedApiClient<H>,
        template: RequestTemplate,
        persister: P,
    ) -> Self {
        Self {
            kind,
            client,
            template,
            persister,
        }
    }

    /// Normalize a response according to the operation kind.
    pub fn extract(&self, raw: &RawResponse) -> Result<ExtractedContent, ExtractionError> {
        let payload = raw.payload();
        match self.kind {
            OperationKind::ProfileRefresh => extract_metrics(&payload).map(ExtractedContent::Metrics),
            OperationKind::VideoListing => extract_videos(&payload).map(ExtractedContent::Videos),
            OperationKind::TextGeneration => extract_text(&payload).map(ExtractedContent::Text),
        }
    }
}

#[async_trait]
impl<H, P> ItemOperation for EnrichOperation<H, P>
where
    H: HttpClient + 'static,
    P: ResultPersister + 'static,
{
    fn kind(&self) -> OperationKind {
        self.kind
    }

    async fn execute(&self, item: &ItemData) -> Result<OperationOutput, OperationFailure> {
        let request = self.template.render(&item.identifier);
        let raw = self.client.call(&request).await?;
        let attempts = raw.attempts;

        let content = self
            .extract(&raw)
            .map_err(|e| OperationFailure::new(e.into(), attempts))?;

        // The write-back is never retried; only the HTTP call is
        if let Err(e) = self.persister.persist(&item.owner_id, &content).await {
            tracing::error!(owner_id = %item.owner_id, error = %e, "Fetched result could not be saved");
            return Err(OperationFailure::new(e.into(), attempts));
        }

        Ok(OperationOutput { content, attempts })
    }
}

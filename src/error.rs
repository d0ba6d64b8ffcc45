//! Error types for the enrichment pipeline.
//!
//! Two layers of errors exist. [`VolleyError`] is returned to the caller of a batch run and
//! only covers problems with the invocation itself. Everything that can go wrong for a single
//! item ([`CallError`], [`ExtractionError`], [`PersistError`]) is caught by the runner and
//! recorded on that item as a [`FailureReason`](crate::domain::item::FailureReason).

use thiserror::Error;

use crate::eligibility::OperationKind;

/// Result type alias using the volley error type.
pub type Result<T> = std::result::Result<T, VolleyError>;

/// Invocation-level error for the enrichment pipeline.
#[derive(Error, Debug)]
pub enum VolleyError {
    /// The input batch contained items, but none of them qualified for the operation
    #[error("No eligible items for {operation}")]
    NoEligibleItems { operation: OperationKind },

    /// The input batch was empty
    #[error("Batch contains no items")]
    EmptyBatch,

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of one logical call made through the
/// [`RateLimitedApiClient`](crate::client::RateLimitedApiClient).
///
/// Every variant records how many physical HTTP attempts were made before giving up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Every attempt was answered with a rate-limit response
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// Non-retryable HTTP status
    #[error("Request failed with status {status}: {body}")]
    RequestFailed {
        status: u16,
        body: String,
        attempts: u32,
    },

    /// The request never produced an HTTP response
    #[error("Transport error: {message}")]
    Transport { message: String, attempts: u32 },
}

impl CallError {
    /// Number of physical HTTP attempts made for the logical call.
    pub fn attempts(&self) -> u32 {
        match self {
            CallError::RateLimitExceeded { attempts }
            | CallError::RequestFailed { attempts, .. }
            | CallError::Transport { attempts, .. } => *attempts,
        }
    }
}

/// A successful response whose payload could not be normalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// No text strategy and no list locator matched the payload
    #[error("No content found in response")]
    NoContentFound,

    /// Profile payload without a follower count
    #[error("Response has no follower count")]
    MissingFollowerCount,
}

/// Write-back of an extracted result failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Store error: {0}")]
    Store(String),
}

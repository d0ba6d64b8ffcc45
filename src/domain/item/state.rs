//! Item states for the enrichment lifecycle.
//!
//! Each item of a run progresses through distinct states, enforced at compile time:
//! an `Item<Pending>` can only be started, an `Item<Processing>` can only succeed or fail,
//! and terminal items have no transitions at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::content::ExtractedContent;
use crate::error::{CallError, ExtractionError, PersistError};

/// Lifecycle status of an item, as stored on records and reported in run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Succeeded | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker trait for valid item states.
pub trait ItemState: Send + Sync {}

/// One unit of work inside a run.
///
/// The generic parameter `T` represents the current state of the item.
#[derive(Debug, Clone, Serialize)]
pub struct Item<T: ItemState> {
    pub state: T,
    pub data: ItemData,
}

/// Caller-supplied identity of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    /// Social handle, username or owning record id sent to the API
    pub identifier: String,
    /// Record updated on success
    pub owner_id: String,
}

/// Item is waiting to be processed.
#[derive(Debug, Clone, Serialize)]
pub struct Pending {}

impl ItemState for Pending {}

/// Item's operation is running (HTTP call, extraction, write-back).
#[derive(Debug, Clone, Serialize)]
pub struct Processing {
    pub started_at: DateTime<Utc>,
}

impl ItemState for Processing {}

/// Item was fetched, extracted and persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Succeeded {
    pub content: ExtractedContent,
    /// HTTP attempts made, including rate-limited retries
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ItemState for Succeeded {}

/// Item failed at some stage of its operation.
#[derive(Debug, Clone, Serialize)]
pub struct Failed {
    pub reason: FailureReason,
    /// HTTP attempts made before the failure
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl ItemState for Failed {}

/// Reason why an item failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum FailureReason {
    /// Every attempt of the HTTP call was rate limited.
    RateLimitExceeded { attempts: u32 },

    /// The API answered with a non-retryable error status.
    RequestFailed { status: u16, body: String },

    /// Network error, timeout, or other transport-level failure.
    Transport { error: String },

    /// The response shape was not recognized.
    NoContentFound,

    /// A profile response carried no follower count.
    MissingFollowerCount,

    /// The result was fetched but could not be written back.
    Persist { error: String },

    /// Failure raised by a caller-supplied operation.
    Operation { error: String },
}

impl FailureReason {
    /// True when the data was fetched but the write-back failed.
    pub fn is_persist_failure(&self) -> bool {
        matches!(self, FailureReason::Persist { .. })
    }

    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::RateLimitExceeded { .. } => "rate_limit_exceeded",
            FailureReason::RequestFailed { .. } => "request_failed",
            FailureReason::Transport { .. } => "transport",
            FailureReason::NoContentFound => "no_content_found",
            FailureReason::MissingFollowerCount => "missing_follower_count",
            FailureReason::Persist { .. } => "persist",
            FailureReason::Operation { .. } => "operation",
        }
    }

    /// Returns a human-readable error message for this failure reason.
    pub fn to_error_message(&self) -> String {
        match self {
            FailureReason::RateLimitExceeded { attempts } => {
                format!("Rate limit exceeded after {} attempts", attempts)
            }
            FailureReason::RequestFailed { status, body } => {
                format!("Request failed with status {}: {}", status, body)
            }
            FailureReason::Transport { error } => format!("Transport error: {}", error),
            FailureReason::NoContentFound => "No content found in response".to_string(),
            FailureReason::MissingFollowerCount => "Response has no follower count".to_string(),
            FailureReason::Persist { error } => format!("Failed to save result: {}", error),
            FailureReason::Operation { error } => error.clone(),
        }
    }
}

impl From<CallError> for FailureReason {
    fn from(err: CallError) -> Self {
        match err {
            CallError::RateLimitExceeded { attempts } => {
                FailureReason::RateLimitExceeded { attempts }
            }
            CallError::RequestFailed { status, body, .. } => {
                FailureReason::RequestFailed { status, body }
            }
            CallError::Transport { message, .. } => FailureReason::Transport { error: message },
        }
    }
}

impl From<ExtractionError> for FailureReason {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::NoContentFound => FailureReason::NoContentFound,
            ExtractionError::MissingFollowerCount => FailureReason::MissingFollowerCount,
        }
    }
}

impl From<PersistError> for FailureReason {
    fn from(err: PersistError) -> Self {
        FailureReason::Persist {
            error: err.to_string(),
        }
    }
}

/// Enum that can hold an item in any state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "item")]
pub enum AnyItem {
    Pending(Item<Pending>),
    Processing(Item<Processing>),
    Succeeded(Item<Succeeded>),
    Failed(Item<Failed>),
}

impl AnyItem {
    pub fn data(&self) -> &ItemData {
        match self {
            AnyItem::Pending(i) => &i.data,
            AnyItem::Processing(i) => &i.data,
            AnyItem::Succeeded(i) => &i.data,
            AnyItem::Failed(i) => &i.data,
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            AnyItem::Pending(_) => ItemStatus::Pending,
            AnyItem::Processing(_) => ItemStatus::Processing,
            AnyItem::Succeeded(_) => ItemStatus::Succeeded,
            AnyItem::Failed(_) => ItemStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

impl From<Item<Pending>> for AnyItem {
    fn from(i: Item<Pending>) -> Self {
        AnyItem::Pending(i)
    }
}

impl From<Item<Processing>> for AnyItem {
    fn from(i: Item<Processing>) -> Self {
        AnyItem::Processing(i)
    }
}

impl From<Item<Succeeded>> for AnyItem {
    fn from(i: Item<Succeeded>) -> Self {
        AnyItem::Succeeded(i)
    }
}

impl From<Item<Failed>> for AnyItem {
    fn from(i: Item<Failed>) -> Self {
        AnyItem::Failed(i)
    }
}

/// Flattened view of an item: what callers pass in and what a run reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Social handle, username or owning record id. Must be non-empty to be eligible.
    pub identifier: String,
    /// Record to update on success
    pub owner_id: String,
    pub current_status: ItemStatus,
    /// Populated only on terminal failure
    pub last_error: Option<String>,
    /// HTTP attempts made for this item, including retries
    pub attempt: u32,
    /// Structured failure, alongside `last_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Extracted result of a successful item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExtractedContent>,
}

impl BatchItem {
    pub fn new(identifier: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            owner_id: owner_id.into(),
            current_status: ItemStatus::Pending,
            last_error: None,
            attempt: 0,
            failure: None,
            result: None,
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.current_status = status;
        self
    }

    /// Whether the identifier carries anything besides whitespace.
    pub fn has_identifier(&self) -> bool {
        !self.identifier.trim().is_empty()
    }

    /// Fresh pending state for a new run. The incoming status is not carried over.
    pub fn to_pending(&self) -> Item<Pending> {
        Item {
            state: Pending {},
            data: ItemData {
                identifier: self.identifier.trim().to_string(),
                owner_id: self.owner_id.clone(),
            },
        }
    }
}

impl From<AnyItem> for BatchItem {
    fn from(item: AnyItem) -> Self {
        let current_status = item.status();
        let (data, last_error, attempt, failure, result) = match item {
            AnyItem::Pending(i) => (i.data, None, 0, None, None),
            AnyItem::Processing(i) => (i.data, None, 0, None, None),
            AnyItem::Succeeded(i) => (
                i.data,
                None,
                i.state.attempts,
                None,
                Some(i.state.content),
            ),
            AnyItem::Failed(i) => (
                i.data,
                Some(i.state.reason.to_error_message()),
                i.state.attempts,
                Some(i.state.reason),
                None,
            ),
        };
        Self {
            identifier: data.identifier,
            owner_id: data.owner_id,
            current_status,
            last_error,
            attempt,
            failure,
            result,
        }
    }
}

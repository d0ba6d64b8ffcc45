//! Which items of a batch take part in an operation.

use serde::{Deserialize, Serialize};

use crate::domain::item::{BatchItem, ItemStatus};
use crate::error::{Result, VolleyError};

/// The bulk operations the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Follower / engagement refresh from a social-profile lookup
    ProfileRefresh,
    /// Recent-video listing
    VideoListing,
    /// LLM text generation
    TextGeneration,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ProfileRefresh => "profile_refresh",
            OperationKind::VideoListing => "video_listing",
            OperationKind::TextGeneration => "text_generation",
        }
    }

    /// Pause between items that keeps a sequential run under the provider's rate limit.
    pub fn default_pacing_ms(&self) -> u64 {
        match self {
            OperationKind::ProfileRefresh => 1000,
            OperationKind::VideoListing => 1500,
            OperationKind::TextGeneration => 1000,
        }
    }

    /// Whether `item` takes part in this operation.
    pub fn is_eligible(&self, item: &BatchItem) -> bool {
        match self {
            OperationKind::ProfileRefresh | OperationKind::VideoListing => item.has_identifier(),
            // Completed generations are never redone, which is what makes re-runs safe
            OperationKind::TextGeneration => {
                item.has_identifier() && item.current_status != ItemStatus::Succeeded
            }
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow `items` to those eligible for `operation`, preserving input order.
///
/// An empty input is [`VolleyError::EmptyBatch`]; a non-empty input with nothing eligible is
/// [`VolleyError::NoEligibleItems`], so "nothing to do" is never reported as an empty run.
pub fn filter_eligible(items: &[BatchItem], operation: OperationKind) -> Result<Vec<BatchItem>> {
    if items.is_empty() {
        return Err(VolleyError::EmptyBatch);
    }

    let eligible: Vec<BatchItem> = items
        .iter()
        .filter(|item| operation.is_eligible(item))
        .cloned()
        .collect();

    if eligible.is_empty() {
        return Err(VolleyError::NoEligibleItems { operation });
    }

    tracing::debug!(
        operation = %operation,
        total = items.len(),
        eligible = eligible.len(),
        "Filtered batch"
    );
    Ok(eligible)
}

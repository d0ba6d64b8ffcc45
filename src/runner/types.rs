use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::BatchItem;
use crate::eligibility::OperationKind;
use crate::error::{Result, VolleyError};

/// Identifier of one batch run, attached to its tracing span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        RunId(uuid)
    }
}

impl std::ops::Deref for RunId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Configuration for a [`BatchRunner`](super::BatchRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Minimum gap between starting two items, in milliseconds.
    /// With more than one item in flight this bounds the aggregate start rate.
    pub inter_item_delay_ms: u64,

    /// Also wait before the first item
    pub pace_first_item: bool,

    /// Maximum number of items processed at once (1 = strictly sequential)
    pub max_concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inter_item_delay_ms: 1000,
            pace_first_item: false,
            max_concurrency: 1,
        }
    }
}

impl RunnerConfig {
    /// Sequential configuration with the pacing observed to stay under each provider's limit.
    pub fn for_operation(kind: OperationKind) -> Self {
        Self {
            inter_item_delay_ms: kind.default_pacing_ms(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(VolleyError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunResult {
    pub run_id: RunId,
    pub operation: OperationKind,
    pub total_eligible: usize,
    pub succeeded: usize,
    /// Includes items whose result was fetched but could not be saved
    pub failed: usize,
    /// Eligible items never started because the run was cancelled
    pub skipped: usize,
    /// Failed items whose fetch succeeded but whose write-back did not
    pub persist_failed: usize,
    pub cancelled: bool,
    /// Final state of every eligible item, in input order
    pub per_item: Vec<BatchItem>,
}

impl BatchRunResult {
    /// `succeeded + failed + skipped == total_eligible`
    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed + self.skipped == self.total_eligible
    }

    /// Items whose write-back failed and can be saved again without refetching.
    pub fn persist_failures(&self) -> impl Iterator<Item = &BatchItem> {
        self.per_item
            .iter()
            .filter(|item| item.failure.as_ref().is_some_and(|f| f.is_persist_failure()))
    }

    /// One-line notification for the end of the run, e.g. `"3 succeeded, 1 failed"`.
    pub fn summary_message(&self) -> String {
        let mut message = format!("{} succeeded, {} failed", self.succeeded, self.failed);
        if self.persist_failed > 0 {
            message.push_str(&format!(" ({} not saved)", self.persist_failed));
        }
        if self.skipped > 0 {
            message.push_str(&format!(", {} skipped", self.skipped));
        }
        message
    }
}

//! State transitions for batch items using the typestate pattern.
//!
//! ```text
//! Item<Pending> ──start()──> Item<Processing> ──succeed()──> Item<Succeeded>
//!                                    │
//!                                    └──────────fail()─────> Item<Failed>
//! ```
//!
//! Transitions consume the item, so no state can be revisited. Retries of a rate-limited call
//! happen inside the client while the item stays `Processing`.

use super::state::{FailureReason, Failed, Item, Pending, Processing, Succeeded};
use crate::domain::content::ExtractedContent;

impl Item<Pending> {
    pub fn start(self) -> Item<Processing> {
        tracing::trace!(owner_id = %self.data.owner_id, "Item processing");
        Item {
            data: self.data,
            state: Processing {
                started_at: chrono::Utc::now(),
            },
        }
    }
}

impl Item<Processing> {
    pub fn succeed(self, content: ExtractedContent, attempts: u32) -> Item<Succeeded> {
        Item {
            data: self.data,
            state: Succeeded {
                content,
                attempts,
                started_at: self.state.started_at,
                completed_at: chrono::Utc::now(),
            },
        }
    }

    pub fn fail(self, reason: FailureReason, attempts: u32) -> Item<Failed> {
        Item {
            data: self.data,
            state: Failed {
                reason,
                attempts,
                started_at: self.state.started_at,
                failed_at: chrono::Utc::now(),
            },
        }
    }
}

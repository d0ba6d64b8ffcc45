//! Record store and result write-back.
//!
//! The record store belongs to the surrounding application; this module only defines the
//! interface the pipeline consumes ([`RecordStore`]), the write-back seam the runner's
//! operations use ([`ResultPersister`]) and an adapter joining the two ([`RecordPersister`]).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::content::ExtractedContent;
use crate::domain::item::{BatchItem, ItemStatus};
use crate::domain::record::{Record, RecordFilter, RecordUpdate};
use crate::eligibility::OperationKind;
use crate::error::PersistError;

mod memory;

pub use memory::InMemoryRecordStore;

/// Remote store holding creator (and other) records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records matching `filter`. When the filter lists ids, results follow that order.
    async fn get_batch(&self, filter: &RecordFilter) -> Result<Vec<Record>, PersistError>;

    /// Apply a partial update to one record.
    async fn update_record(&self, id: &str, update: RecordUpdate) -> Result<(), PersistError>;
}

/// Writes an extracted result back onto the record that owns it.
#[async_trait]
pub trait ResultPersister: Send + Sync {
    async fn persist(&self, owner_id: &str, content: &ExtractedContent)
    -> Result<(), PersistError>;
}

/// Operation whose result `content` is. Its status is the one a write-back completes.
pub fn content_operation(content: &ExtractedContent) -> OperationKind {
    match content {
        ExtractedContent::Metrics(_) => OperationKind::ProfileRefresh,
        ExtractedContent::Videos(_) => OperationKind::VideoListing,
        ExtractedContent::Text(_) => OperationKind::TextGeneration,
    }
}

/// Record fields written for a piece of content, plus the producing operation's status.
///
/// Only that operation's status changes, so a profile refresh never marks a generation done.
pub fn content_update(content: &ExtractedContent) -> Result<RecordUpdate, PersistError> {
    let update = match content {
        ExtractedContent::Metrics(metrics) => {
            let mut update = RecordUpdate::default().set("follower_count", metrics.follower_count);
            if let Some(hearts) = metrics.heart_count {
                update = update.set("heart_count", hearts);
            }
            if let Some(secure_id) = &metrics.secure_id {
                update = update.set("sec_uid", secure_id.clone());
            }
            if let Some(rate) = metrics.engagement_rate {
                update = update.set("engagement_rate", json!(rate));
            }
            update
        }
        ExtractedContent::Text(text) => RecordUpdate::default().set("generated_text", text.clone()),
        ExtractedContent::Videos(videos) => {
            let value =
                serde_json::to_value(videos).map_err(|e| PersistError::Store(e.to_string()))?;
            RecordUpdate::default().set("videos", value)
        }
    };
    Ok(update.with_status(content_operation(content), ItemStatus::Succeeded))
}

/// [`ResultPersister`] that writes through a [`RecordStore`].
pub struct RecordPersister<S: RecordStore> {
    store: Arc<S>,
}

impl<S: RecordStore> RecordPersister<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: RecordStore> Clone for RecordPersister<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

#[async_trait]
impl<S: RecordStore> ResultPersister for RecordPersister<S> {
    async fn persist(
        &self,
        owner_id: &str,
        content: &ExtractedContent,
    ) -> Result<(), PersistError> {
        let update = content_update(content)?;
        self.store.update_record(owner_id, update).await
    }
}

/// Load records and turn them into batch items for `operation`, keyed on one handle field.
///
/// Each item carries the record's status for `operation` only. Records without the handle
/// become items with an empty identifier, which eligibility filtering then rejects.
pub async fn load_items<S: RecordStore + ?Sized>(
    store: &S,
    filter: &RecordFilter,
    handle_field: &str,
    operation: OperationKind,
) -> Result<Vec<BatchItem>, PersistError> {
    let records = store.get_batch(filter).await?;
    tracing::debug!(count = records.len(), handle_field, operation = %operation, "Loaded records");

    Ok(records
        .into_iter()
        .map(|record| {
            let identifier = record.handle(handle_field).unwrap_or_default().to_string();
            let status = record.status(operation);
            BatchItem::new(identifier, record.id).with_status(status)
        })
        .collect())
}

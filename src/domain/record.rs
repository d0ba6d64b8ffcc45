//! Record-store shapes.
//!
//! Records belong to the surrounding application (creators, projects, ...). The pipeline only
//! needs an id, some social handle fields, a status and a bag of fields to write results into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::item::ItemStatus;
use crate::eligibility::OperationKind;

/// A record owned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    /// Social handle fields, e.g. `"tiktok" => "@creator"`
    #[serde(default)]
    pub handles: BTreeMap<String, String>,
    /// Lifecycle status of each operation run against this record. Absent means pending.
    #[serde(default)]
    pub statuses: BTreeMap<OperationKind, ItemStatus>,
    /// Fields that receive metrics or generated text
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handles: BTreeMap::new(),
            statuses: BTreeMap::new(),
            fields: Map::new(),
        }
    }

    pub fn with_handle(mut self, field: impl Into<String>, handle: impl Into<String>) -> Self {
        self.handles.insert(field.into(), handle.into());
        self
    }

    pub fn with_status(mut self, operation: OperationKind, status: ItemStatus) -> Self {
        self.statuses.insert(operation, status);
        self
    }

    /// Status of `operation` on this record; a record it never touched is pending.
    pub fn status(&self, operation: OperationKind) -> ItemStatus {
        self.statuses.get(&operation).copied().unwrap_or_default()
    }

    /// The handle stored under `field`, if present and not blank.
    pub fn handle(&self, field: &str) -> Option<&str> {
        self.handles
            .get(field)
            .map(String::as_str)
            .filter(|h| !h.trim().is_empty())
    }
}

/// Selection criteria for [`RecordStore::get_batch`](crate::store::RecordStore::get_batch).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Restrict to these ids (in this order)
    pub ids: Option<Vec<String>>,
    /// Only records whose status for the operation matches
    pub status: Option<(OperationKind, ItemStatus)>,
    /// Only records with a non-blank handle in this field
    pub with_handle: Option<String>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&record.id)
        {
            return false;
        }
        if let Some((operation, status)) = self.status
            && record.status(operation) != status
        {
            return false;
        }
        if let Some(field) = &self.with_handle
            && record.handle(field).is_none()
        {
            return false;
        }
        true
    }
}

/// Partial update applied to one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub fields: Map<String, Value>,
    pub status: Option<(OperationKind, ItemStatus)>,
}

impl RecordUpdate {
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn with_status(mut self, operation: OperationKind, status: ItemStatus) -> Self {
        self.status = Some((operation, status));
        self
    }
}

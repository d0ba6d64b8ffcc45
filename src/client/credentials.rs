//! Round-robin pool of API credentials.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, VolleyError};

/// A fixed set of API keys handed out in round-robin order.
///
/// The key list is read-only after construction. The rotation index is owned by the pool
/// instance, so independent pools (one per process, one per test) never interfere.
/// Clones share both the keys and the index.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    keys: Arc<[String]>,
    next: Arc<AtomicUsize>,
}

impl CredentialPool {
    /// Build a pool from a list of keys. At least one non-blank key is required.
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(VolleyError::InvalidConfig(
                "credential pool needs at least one key".to_string(),
            ));
        }
        if keys.iter().any(|k| k.trim().is_empty()) {
            return Err(VolleyError::InvalidConfig(
                "credential pool contains a blank key".to_string(),
            ));
        }
        Ok(Self {
            keys: keys.into(),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Parse a comma-separated list of keys, e.g. the value of an environment variable.
    pub fn from_delimited(value: &str) -> Result<Self> {
        let keys = value
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(keys)
    }

    /// Take the credential at the current index and advance the index.
    ///
    /// Read-then-advance is a single atomic operation, so concurrent callers never
    /// observe the same slot twice in one rotation.
    pub fn next_credential(&self) -> &str {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[slot]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

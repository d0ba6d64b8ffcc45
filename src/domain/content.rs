//! Normalized results of a successful API call.

use serde::{Deserialize, Serialize};

/// What an item's response was reduced to before write-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtractedContent {
    /// Profile counters
    Metrics(Metrics),
    /// Generated or fetched plain text, newline-expanded
    Text(String),
    /// A listing of recent videos
    Videos(Vec<VideoSummary>),
}

/// Profile metrics for one creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub follower_count: u64,
    pub heart_count: Option<u64>,
    /// Opaque platform identifier (e.g. TikTok `secUid`)
    pub secure_id: Option<String>,
    /// Percent; absent unless both counters are known and followers > 0
    pub engagement_rate: Option<f64>,
}

impl Metrics {
    pub fn new(follower_count: u64, heart_count: Option<u64>, secure_id: Option<String>) -> Self {
        Self {
            follower_count,
            heart_count,
            secure_id,
            engagement_rate: engagement_rate(follower_count, heart_count),
        }
    }
}

/// `heart_count / follower_count * 100`, or `None` when it cannot be computed.
pub fn engagement_rate(follower_count: u64, heart_count: Option<u64>) -> Option<f64> {
    match heart_count {
        Some(hearts) if follower_count > 0 => Some(hearts as f64 / follower_count as f64 * 100.0),
        _ => None,
    }
}

/// One entry of a video listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub title: Option<String>,
    pub view_count: Option<u64>,
    pub cover_url: Option<String>,
}

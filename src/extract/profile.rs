//! Profile metrics extraction.

use serde_json::Value;

use super::as_count;
use crate::domain::content::Metrics;
use crate::error::ExtractionError;

/// Where counter objects live in the profile payloads we handle, most specific first.
/// The empty pointer is the payload root.
const STATS_POINTERS: &[&str] = &[
    "/userInfo/stats",
    "/data/userInfo/stats",
    "/data/stats",
    "/stats",
    "/items/0/statistics",
    "",
];

const USER_POINTERS: &[&str] = &["/userInfo/user", "/data/userInfo/user", "/data/user", "/user", ""];

const FOLLOWER_KEYS: &[&str] = &["followerCount", "subscriberCount"];
const HEART_KEYS: &[&str] = &["heartCount", "heart"];

fn first_count(object: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| object.get(*k).and_then(as_count))
}

/// Extract follower, heart and secure-id values from a profile payload.
///
/// A payload without any follower count fails with
/// [`ExtractionError::MissingFollowerCount`]. Engagement is only computed when both
/// counters are present and the follower count is positive.
pub fn extract_metrics(payload: &Value) -> Result<Metrics, ExtractionError> {
    let (stats, follower_count) = STATS_POINTERS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find_map(|stats| first_count(stats, FOLLOWER_KEYS).map(|count| (stats, count)))
        .ok_or(ExtractionError::MissingFollowerCount)?;

    let heart_count = first_count(stats, HEART_KEYS);

    let secure_id = USER_POINTERS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find_map(|user| user.get("secUid").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Ok(Metrics::new(follower_count, heart_count, secure_id))
}

//! Video listing extraction.

use serde_json::Value;

use super::as_count;
use crate::domain::content::VideoSummary;
use crate::error::ExtractionError;

const LIST_POINTERS: &[&str] = &[
    "/data/videos",
    "/data/items",
    "/videos",
    "/items",
    "/aweme_list",
    "/data",
];

const ID_POINTERS: &[&str] = &["/id/videoId", "/id", "/aweme_id", "/video_id"];
const TITLE_POINTERS: &[&str] = &["/title", "/desc", "/description", "/snippet/title"];
const VIEW_POINTERS: &[&str] = &[
    "/stats/playCount",
    "/playCount",
    "/play_count",
    "/viewCount",
    "/statistics/viewCount",
];
const COVER_POINTERS: &[&str] = &[
    "/cover",
    "/video/cover",
    "/thumbnail",
    "/snippet/thumbnails/default/url",
];

fn first<'a>(entry: &'a Value, pointers: &[&str]) -> Option<&'a Value> {
    pointers.iter().find_map(|p| entry.pointer(p))
}

fn first_str(entry: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| entry.pointer(p))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn summarize(entry: &Value) -> Option<VideoSummary> {
    Some(VideoSummary {
        id: first_str(entry, ID_POINTERS)?,
        title: first_str(entry, TITLE_POINTERS),
        view_count: first(entry, VIEW_POINTERS).and_then(as_count),
        cover_url: first_str(entry, COVER_POINTERS),
    })
}

/// Extract a list of videos from the first array found in the payload.
///
/// Entries without an id are dropped. An empty result is [`ExtractionError::NoContentFound`].
pub fn extract_videos(payload: &Value) -> Result<Vec<VideoSummary>, ExtractionError> {
    let list = LIST_POINTERS
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find_map(Value::as_array)
        .ok_or(ExtractionError::NoContentFound)?;

    let videos: Vec<VideoSummary> = list.iter().filter_map(summarize).collect();
    if videos.is_empty() {
        return Err(ExtractionError::NoContentFound);
    }

    tracing::trace!(count = videos.len(), dropped = list.len() - videos.len(), "Extracted videos");
    Ok(videos)
}

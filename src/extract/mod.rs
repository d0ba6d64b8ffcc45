//! Normalization of heterogeneous API payloads.
//!
//! Text endpoints (LLM gateways, scraping actors) answer in several shapes. They are tried as
//! an ordered list of [`TextStrategy`] values, first match wins:
//!
//! 1. the payload is itself a string
//! 2. a top-level `content` field
//! 3. a top-level `result` field
//! 4. a chat-completion shape, `choices[0].message.content`
//! 5. a `"content":"..."` substring anywhere in the serialized payload
//!
//! Extracted text is then passed through [`expand_newlines`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ExtractionError;

mod profile;
mod videos;

pub use profile::extract_metrics;
pub use videos::extract_videos;

static RE_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""content":"((?:[^"\\]|\\.)*)""#).expect("valid content regex")
});

/// One way of pulling text out of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStrategy {
    RawString,
    ContentField,
    ResultField,
    ChatCompletion,
    SerializedContentScan,
}

/// Strategies in priority order.
pub const TEXT_STRATEGIES: [TextStrategy; 5] = [
    TextStrategy::RawString,
    TextStrategy::ContentField,
    TextStrategy::ResultField,
    TextStrategy::ChatCompletion,
    TextStrategy::SerializedContentScan,
];

impl TextStrategy {
    /// Raw text found by this strategy, before newline expansion.
    pub fn apply(&self, payload: &Value) -> Option<String> {
        match self {
            TextStrategy::RawString => match payload {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            },
            TextStrategy::ContentField => payload.get("content").and_then(text_value),
            TextStrategy::ResultField => payload.get("result").and_then(text_value),
            TextStrategy::ChatCompletion => payload
                .pointer("/choices/0/message/content")
                .and_then(text_value),
            TextStrategy::SerializedContentScan => {
                let serialized = payload.to_string();
                RE_CONTENT
                    .captures(&serialized)
                    .and_then(|caps| caps.get(1))
                    // The capture is still a JSON string body; decode its escapes
                    .and_then(|m| {
                        serde_json::from_str::<String>(&format!("\"{}\"", m.as_str())).ok()
                    })
                    .filter(|s| !s.is_empty())
            }
        }
    }
}

/// Text carried by a field value. Null and empty strings do not count as content;
/// arrays of `{"text": ...}` parts are joined; other values are serialized.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        other => Some(other.to_string()),
    }
}

/// Extract plain text from a payload and expand its newlines.
pub fn extract_text(payload: &Value) -> Result<String, ExtractionError> {
    let (strategy, text) = TEXT_STRATEGIES
        .iter()
        .find_map(|s| s.apply(payload).map(|text| (s, text)))
        .ok_or(ExtractionError::NoContentFound)?;

    tracing::trace!(?strategy, len = text.len(), "Extracted text");
    Ok(expand_newlines(&text))
}

/// Turn literal `\n` escapes into newlines, then double every newline.
///
/// The order matters: escapes become real newlines first so that they get paragraph spacing too.
pub fn expand_newlines(text: &str) -> String {
    text.replace("\\n", "\n").replace('\n', "\n\n")
}

/// Read an unsigned counter that may be encoded as a number, a float or a numeric string.
pub(crate) fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_string_payload() {
        let text = extract_text(&json!("hello there")).unwrap();
        assert_eq!(text, "hello there");
    }

    #[test]
    fn test_content_field_beats_chat_completion() {
        let payload = json!({
            "content": "from content",
            "choices": [{"message": {"content": "from choices"}}]
        });
        assert_eq!(extract_text(&payload).unwrap(), "from content");
    }

    #[test]
    fn test_result_field() {
        let payload = json!({"result": "from result", "choices": []});
        assert_eq!(extract_text(&payload).unwrap(), "from result");
    }

    #[test]
    fn test_chat_completion_shape() {
        let payload = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}}]
        });
        assert_eq!(extract_text(&payload).unwrap(), "Hi!");
    }

    #[test]
    fn test_null_content_falls_through() {
        let payload = json!({"content": null, "result": "fallback"});
        assert_eq!(extract_text(&payload).unwrap(), "fallback");
    }

    #[test]
    fn test_content_parts_are_joined() {
        let payload = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(extract_text(&payload).unwrap(), "ab");
    }

    #[test]
    fn test_serialized_scan_finds_nested_content() {
        let payload = json!({"data": {"output": [{"content": "deep\nvalue"}]}});
        assert_eq!(extract_text(&payload).unwrap(), "deep\n\nvalue");
    }

    #[test]
    fn test_serialized_scan_decodes_escapes() {
        let payload = json!({"data": {"out": [{"content": "He said \"hi\" café\\o/"}]}});
        assert_eq!(
            TextStrategy::SerializedContentScan.apply(&payload).as_deref(),
            Some("He said \"hi\" café\\o/")
        );
        assert_eq!(extract_text(&payload).unwrap(), "He said \"hi\" café\\o/");
    }

    #[test]
    fn test_no_content_found() {
        let payload = json!({"status": "ok", "data": {"items": []}});
        assert_eq!(extract_text(&payload), Err(ExtractionError::NoContentFound));
        assert_eq!(extract_text(&json!("")), Err(ExtractionError::NoContentFound));
    }

    #[test]
    fn test_newline_expansion_order() {
        assert_eq!(expand_newlines("line1\\nline2"), "line1\n\nline2");
        assert_eq!(expand_newlines("a\nb\\nc"), "a\n\nb\n\nc");
        assert_eq!(expand_newlines("no breaks"), "no breaks");
    }

    #[test]
    fn test_strategy_order_is_fixed() {
        assert_eq!(TEXT_STRATEGIES[0], TextStrategy::RawString);
        assert_eq!(TEXT_STRATEGIES[4], TextStrategy::SerializedContentScan);
        assert_eq!(
            TextStrategy::ResultField.apply(&json!({"content": "x"})),
            None
        );
    }

    #[test]
    fn test_as_count() {
        assert_eq!(as_count(&json!(42)), Some(42));
        assert_eq!(as_count(&json!(42.9)), Some(42));
        assert_eq!(as_count(&json!(" 1200 ")), Some(1200));
        assert_eq!(as_count(&json!(-3)), None);
        assert_eq!(as_count(&json!("n/a")), None);
    }
}

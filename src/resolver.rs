#![forbid(unsafe_code)]

//! Extracts the numeric `aid` of a video from its HTML page.
//!
//! The page embeds its initial state as `window.__INITIAL_STATE__={...};`.
//! That object is parsed with `serde_json` and searched for the entry whose
//! `bvid` matches the requested short code. Older page layouts that do not
//! carry the state block are handled by a plain `"aid":N,"bvid":"..."` match.

use regex::Regex;
use serde_json::Value;

use crate::models::NumericVideoId;

const STATE_MARKER: &str = "window.__INITIAL_STATE__=";

/// Returns `None` when neither the state block nor the inline pattern names
/// the video.
pub fn extract_aid(html: &str, short_code: &str) -> Option<NumericVideoId> {
    aid_from_initial_state(html, short_code)
        .or_else(|| aid_from_pattern(html, short_code))
        .map(NumericVideoId)
}

fn aid_from_initial_state(html: &str, short_code: &str) -> Option<String> {
    let start = html.find(STATE_MARKER)? + STATE_MARKER.len();
    // The state object is followed by `;(function(){...` so only the first
    // JSON value is read.
    let state = serde_json::Deserializer::from_str(&html[start..])
        .into_iter::<Value>()
        .next()?
        .ok()?;
    find_aid(&state, short_code)
}

fn find_aid(value: &Value, short_code: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            if map.get("bvid").and_then(Value::as_str) == Some(short_code)
                && let Some(aid) = map.get("aid").and_then(aid_text)
            {
                return Some(aid);
            }
            map.values().find_map(|child| find_aid(child, short_code))
        }
        Value::Array(items) => items.iter().find_map(|child| find_aid(child, short_code)),
        _ => None,
    }
}

fn aid_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn aid_from_pattern(html: &str, short_code: &str) -> Option<String> {
    let pattern = format!(r#""aid":(\d+),"bvid":"{}""#, regex::escape(short_code));
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|aid| aid.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_aid_reads_initial_state() {
        let html = r#"<html><script>window.__INITIAL_STATE__={"aid":1,"bvid":"BVother","videoData":{"bvid":"BV1xx","aid":12345,"title":"T"}};(function(){var s;}());</script></html>"#;
        assert_eq!(
            extract_aid(html, "BV1xx"),
            Some(NumericVideoId("12345".into()))
        );
    }

    #[test]
    fn extract_aid_searches_nested_arrays() {
        let html = r#"window.__INITIAL_STATE__={"related":[{"bvid":"BVa","aid":9},{"bvid":"BV1xx","aid":"77"}]};"#;
        assert_eq!(extract_aid(html, "BV1xx"), Some(NumericVideoId("77".into())));
    }

    #[test]
    fn extract_aid_falls_back_to_inline_pattern() {
        let html = r#"<script>var player = {"aid":424242,"bvid":"BV1xx","cid":1};</script>"#;
        assert_eq!(
            extract_aid(html, "BV1xx"),
            Some(NumericVideoId("424242".into()))
        );
    }

    #[test]
    fn extract_aid_falls_back_when_state_is_broken() {
        let html = r#"window.__INITIAL_STATE__={"aid":5,"bvid":"BV1xx" <broken "aid":5,"bvid":"BV1xx""#;
        assert_eq!(extract_aid(html, "BV1xx"), Some(NumericVideoId("5".into())));
    }

    #[test]
    fn extract_aid_reports_missing_video() {
        let html = r#"window.__INITIAL_STATE__={"videoData":{"bvid":"BVzz","aid":1}};"#;
        assert_eq!(extract_aid(html, "BV1xx"), None);
        assert_eq!(extract_aid("<html></html>", "BV1xx"), None);
    }
}

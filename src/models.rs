#![forbid(unsafe_code)]

//! Types shared between the API client, the pipeline and the workbook.
//!
//! The `Raw*` structs mirror the JSON returned by the web API. Every field the
//! platform sometimes omits is defaulted so one odd entry does not poison a
//! whole page.

use chrono::{Local, TimeZone};
use serde::Deserialize;
use std::fmt;

use crate::error::{HarvestError, Result};

/// A video picked from the popular list (or passed explicitly on the CLI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    pub title: String,
    pub short_code: String,
}

impl VideoRef {
    pub fn new(title: impl Into<String>, short_code: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            short_code: short_code.into(),
        }
    }
}

/// Internal numeric id (`aid`) the comment endpoints are keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericVideoId(pub String);

impl fmt::Display for NumericVideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    TopLevel,
    Reply,
}

impl Tier {
    /// Label written into the worksheet.
    pub fn label(self) -> &'static str {
        match self {
            Tier::TopLevel => "一级评论",
            Tier::Reply => "二级评论",
        }
    }
}

/// One worksheet row worth of comment data.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub author_name: String,
    pub content: String,
    /// Empty for top-level comments.
    pub replied_to: String,
    pub tier: Tier,
    pub gender: String,
    pub level: i64,
    pub like_count: i64,
    pub timestamp: String,
}

impl CommentRecord {
    /// Builds a record from an API entry. `parent` is the author a reply
    /// answers to; `None` marks a top-level comment.
    pub fn from_raw(raw: &RawReply, parent: Option<&str>) -> Self {
        let tier = if parent.is_some() {
            Tier::Reply
        } else {
            Tier::TopLevel
        };
        Self {
            author_name: raw.member.uname.clone(),
            content: raw.content.message.clone(),
            replied_to: parent.unwrap_or_default().to_string(),
            tier,
            gender: raw.member.sex.clone(),
            level: raw.member.level_info.current_level,
            like_count: raw.like,
            timestamp: format_ctime(raw.ctime),
        }
    }
}

/// Renders epoch seconds in local time, the way the sheet has always shown it.
pub fn format_ctime(ctime: i64) -> String {
    Local
        .timestamp_opt(ctime, 0)
        .single()
        .map(|datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Why a pagination loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page came back without entries.
    Exhausted,
    /// The page only repeated entries we already had.
    NoGrowth,
    /// `max_pages` pages were read.
    PageLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Complete(StopReason),
    /// Pagination aborted; the records gathered before `cause` are kept.
    Partial { cause: String },
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, FetchOutcome::Partial { .. })
    }
}

/// Everything one worker produced for one video.
#[derive(Debug, Clone)]
pub struct VideoHarvest {
    pub video: VideoRef,
    pub aid: NumericVideoId,
    pub records: Vec<CommentRecord>,
    pub outcome: FetchOutcome,
    pub reply_failures: usize,
}

/// Every API answer wraps its payload like this. A non-zero `code` means the
/// platform refused the request even though the HTTP status was 200.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Returns the payload, or [`HarvestError::Api`] for a rejected request.
    pub fn into_data(self, url: &str) -> Result<Option<T>> {
        if self.code != 0 {
            return Err(HarvestError::Api {
                code: self.code,
                message: self.message,
                url: url.to_string(),
            });
        }
        Ok(self.data)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PopularData {
    #[serde(default)]
    pub list: Vec<PopularEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PopularEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub short_link_v2: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyPage {
    #[serde(default)]
    pub replies: Option<Vec<RawReply>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReply {
    pub rpid: i64,
    #[serde(default)]
    pub member: RawMember,
    #[serde(default)]
    pub content: RawContent,
    #[serde(default)]
    pub like: i64,
    #[serde(default)]
    pub ctime: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMember {
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub level_info: RawLevel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLevel {
    #[serde(default)]
    pub current_level: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub message: String,
}

/// Takes the trailing path segment of a share link such as
/// `https://b23.tv/BV1xx411c7mD`. Query strings and fragments are ignored.
pub fn short_code_from_link(link: &str) -> String {
    let link = link.trim();
    let without_fragment = link.split_once('#').map_or(link, |(base, _)| base);
    let without_query = without_fragment
        .split_once('?')
        .map_or(without_fragment, |(base, _)| base);
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => without_query,
    };
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_code_from_link_takes_last_segment() {
        assert_eq!(short_code_from_link("https://b23.tv/BV1xx411c7mD"), "BV1xx411c7mD");
        assert_eq!(
            short_code_from_link("https://www.bilibili.com/video/BV1ab/?spm=1#reply"),
            "BV1ab"
        );
    }

    #[test]
    fn short_code_from_link_handles_bare_host_and_empty() {
        assert_eq!(short_code_from_link("https://b23.tv"), "");
        assert_eq!(short_code_from_link(""), "");
    }

    #[test]
    fn comment_record_marks_tier_from_parent() {
        let raw: RawReply = serde_json::from_str(
            r#"{"rpid":7,"member":{"uname":"A","sex":"女","level_info":{"current_level":5}},
                "content":{"message":"hi"},"like":3,"ctime":1700000000}"#,
        )
        .unwrap();

        let top = CommentRecord::from_raw(&raw, None);
        assert_eq!(top.tier, Tier::TopLevel);
        assert!(top.replied_to.is_empty());
        assert_eq!(top.level, 5);
        assert_eq!(top.like_count, 3);
        assert_eq!(top.gender, "女");
        assert_eq!(top.timestamp.len(), "2023-11-14 22:13:20".len());

        let reply = CommentRecord::from_raw(&raw, Some("B"));
        assert_eq!(reply.tier, Tier::Reply);
        assert_eq!(reply.replied_to, "B");
    }

    #[test]
    fn reply_page_tolerates_null_replies() {
        let envelope: Envelope<ReplyPage> =
            serde_json::from_str(r#"{"code":0,"data":{"replies":null}}"#).unwrap();
        assert!(envelope.data.unwrap().replies.is_none());

        let envelope: Envelope<ReplyPage> = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(envelope.into_data("http://api/x").unwrap().is_none());
    }

    #[test]
    fn nonzero_code_is_an_api_error() {
        let envelope: Envelope<ReplyPage> =
            serde_json::from_str(r#"{"code":-412,"message":"request was banned","data":null}"#)
                .unwrap();

        let err = envelope.into_data("http://api/x").unwrap_err();

        assert!(matches!(
            err,
            HarvestError::Api { code: -412, ref message, .. } if message == "request was banned"
        ));
    }
}

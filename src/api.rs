#![forbid(unsafe_code)]

//! Client for the popular list, video pages and the two comment endpoints.
//!
//! Comment and reply listings share one pagination loop: pages `1..=max_pages`
//! are requested until a page is empty, a page adds nothing new, or the page
//! ceiling is hit. Entries are deduplicated by `rpid` so a server that keeps
//! serving its last page never produces duplicate rows.

use serde::de::DeserializeOwned;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::http::{Pacer, RateLimiter, RatePolicy, Transport};
use crate::models::{
    CommentRecord, Envelope, FetchOutcome, NumericVideoId, PopularData, RawReply, ReplyPage,
    StopReason, VideoRef, short_code_from_link,
};
use crate::resolver::extract_aid;

pub const POPULAR_URL: &str = "https://api.bilibili.com/x/web-interface/popular";
pub const DEFAULT_MAX_PAGES: u32 = 20;

pub fn video_page_url(short_code: &str) -> String {
    format!("https://www.bilibili.com/video/{short_code}")
}

pub fn comments_url(aid: &NumericVideoId, page: u32) -> String {
    format!("https://api.bilibili.com/x/v2/reply?pn={page}&type=1&oid={aid}&sort=2")
}

pub fn replies_url(aid: &NumericVideoId, root: i64, page: u32) -> String {
    format!("https://api.bilibili.com/x/v2/reply/reply?oid={aid}&type=1&root={root}&ps=10&pn={page}")
}

/// Top-level comments of one video, each followed by its replies.
#[derive(Debug)]
pub struct CommentThread {
    pub records: Vec<CommentRecord>,
    pub outcome: FetchOutcome,
    /// Reply listings that aborted early. Their partial replies are kept.
    pub reply_failures: usize,
}

pub struct ApiClient<T: Transport> {
    transport: T,
    limiter: RateLimiter,
    max_pages: u32,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, policy: RatePolicy, max_pages: u32) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(policy),
            max_pages: max_pages.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn get_text(&self, pacer: &Pacer, url: &str) -> Result<String> {
        Ok(self.limiter.get(&self.transport, pacer, url)?.body)
    }

    /// Decodes an [`Envelope`] and fails when the API code reports a refusal.
    fn get_data<D: DeserializeOwned>(&self, pacer: &Pacer, url: &str) -> Result<Option<D>> {
        let body = self.get_text(pacer, url)?;
        let envelope: Envelope<D> =
            serde_json::from_str(&body).map_err(|err| HarvestError::decode(url, err))?;
        envelope.into_data(url)
    }

    /// Lists the current popular videos. A payload without `data.list` is an
    /// empty list; entries without a share link are skipped. A refused request
    /// is an error, not an empty list.
    pub fn list_popular(&self) -> Result<Vec<VideoRef>> {
        let data: Option<PopularData> = self.get_data(&Pacer::new(), POPULAR_URL)?;
        let entries = data.unwrap_or_default().list;

        let mut videos = Vec::with_capacity(entries.len());
        for entry in entries {
            let short_code = short_code_from_link(&entry.short_link_v2);
            if short_code.is_empty() {
                warn!(title = %entry.title, "popular entry has no short link, skipping");
                continue;
            }
            videos.push(VideoRef::new(entry.title, short_code));
        }
        info!(count = videos.len(), "fetched popular videos");
        Ok(videos)
    }

    /// Fetches the video page and extracts its numeric id.
    pub fn resolve_aid(&self, pacer: &Pacer, short_code: &str) -> Result<NumericVideoId> {
        let html = self.get_text(pacer, &video_page_url(short_code))?;
        extract_aid(&html, short_code).ok_or_else(|| HarvestError::AidNotFound {
            short_code: short_code.to_string(),
        })
    }

    /// Collects every top-level comment of `aid`, fetching each comment's
    /// replies inline before moving on to the next comment.
    pub fn fetch_comments(&self, pacer: &Pacer, aid: &NumericVideoId) -> CommentThread {
        let mut records = Vec::new();
        let mut reply_failures = 0;

        let result = self.paginate(
            pacer,
            |page| comments_url(aid, page),
            |comment| {
                let author = comment.member.uname.clone();
                records.push(CommentRecord::from_raw(&comment, None));
                let (replies, outcome) = self.fetch_replies(pacer, aid, comment.rpid, &author);
                if outcome.is_partial() {
                    reply_failures += 1;
                }
                records.extend(replies);
            },
        );

        let outcome = match result {
            Ok(reason) => FetchOutcome::Complete(reason),
            Err(err) => {
                warn!(%aid, error = %err, kept = records.len(), "comment listing aborted");
                FetchOutcome::Partial {
                    cause: err.to_string(),
                }
            }
        };
        debug!(%aid, records = records.len(), ?outcome, "comment listing finished");

        CommentThread {
            records,
            outcome,
            reply_failures,
        }
    }

    /// Collects the replies under one top-level comment by `parent_author`.
    pub fn fetch_replies(
        &self,
        pacer: &Pacer,
        aid: &NumericVideoId,
        root: i64,
        parent_author: &str,
    ) -> (Vec<CommentRecord>, FetchOutcome) {
        let mut replies = Vec::new();
        let result = self.paginate(
            pacer,
            |page| replies_url(aid, root, page),
            |reply| replies.push(CommentRecord::from_raw(&reply, Some(parent_author))),
        );

        let outcome = match result {
            Ok(reason) => FetchOutcome::Complete(reason),
            Err(err) => {
                warn!(%aid, root, error = %err, kept = replies.len(), "reply listing aborted");
                FetchOutcome::Partial {
                    cause: err.to_string(),
                }
            }
        };
        (replies, outcome)
    }

    /// Walks pages until one of the stop conditions holds. `on_entry` sees
    /// each entry once, in page order.
    fn paginate(
        &self,
        pacer: &Pacer,
        url_for_page: impl Fn(u32) -> String,
        mut on_entry: impl FnMut(RawReply),
    ) -> Result<StopReason> {
        let mut seen = HashSet::new();

        for page in 1..=self.max_pages {
            let url = url_for_page(page);
            let data: Option<ReplyPage> = self.get_data(pacer, &url)?;
            let entries = data.and_then(|data| data.replies).unwrap_or_default();

            if entries.is_empty() {
                return Ok(StopReason::Exhausted);
            }

            let mut fresh = 0;
            for entry in entries {
                if seen.insert(entry.rpid) {
                    fresh += 1;
                    on_entry(entry);
                }
            }
            debug!(url = %url, fresh, "page read");

            if fresh == 0 {
                return Ok(StopReason::NoGrowth);
            }
        }

        Ok(StopReason::PageLimit)
    }
}

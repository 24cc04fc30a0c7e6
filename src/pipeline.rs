#![forbid(unsafe_code)]

//! Runs the per-video harvest on a bounded pool of worker threads.
//!
//! Workers pull videos from a job channel and send back one result per video.
//! Nothing is written while workers run: after the pool drains, the calling
//! thread appends every successful harvest to the workbook in the input
//! video order and saves the file once.

use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::error::{HarvestError, Result};
use crate::http::{Pacer, Transport};
use crate::models::{VideoHarvest, VideoRef};
use crate::workbook::{Workbook, unique_output_path};

/// What a run produced, for the operator.
#[derive(Debug)]
pub struct RunReport {
    pub output: PathBuf,
    /// The workbook exactly as it was saved to `output`.
    pub workbook: Workbook,
    pub harvested: Vec<VideoHarvest>,
    pub failed: Vec<(VideoRef, HarvestError)>,
}

impl RunReport {
    pub fn partial(&self) -> impl Iterator<Item = &VideoHarvest> {
        self.harvested
            .iter()
            .filter(|harvest| harvest.outcome.is_partial() || harvest.reply_failures > 0)
    }

    pub fn total_records(&self) -> usize {
        self.harvested
            .iter()
            .map(|harvest| harvest.records.len())
            .sum()
    }
}

/// Resolves the id of one video and collects its comment tree.
pub fn harvest_video<T: Transport>(client: &ApiClient<T>, video: &VideoRef) -> Result<VideoHarvest> {
    info!(title = %video.title, short_code = %video.short_code, "harvesting video");
    let pacer = Pacer::new();
    let aid = client.resolve_aid(&pacer, &video.short_code)?;
    let thread = client.fetch_comments(&pacer, &aid);
    info!(
        short_code = %video.short_code,
        %aid,
        records = thread.records.len(),
        "video harvested"
    );
    Ok(VideoHarvest {
        video: video.clone(),
        aid,
        records: thread.records,
        outcome: thread.outcome,
        reply_failures: thread.reply_failures,
    })
}

/// Harvests `videos` with `workers` threads. Results come back in input order.
pub fn harvest_all<T: Transport>(
    client: &ApiClient<T>,
    videos: &[VideoRef],
    workers: usize,
) -> Vec<(VideoRef, Result<VideoHarvest>)> {
    let (job_tx, job_rx) = unbounded::<(usize, &VideoRef)>();
    let (result_tx, result_rx) = unbounded();
    for job in videos.iter().enumerate() {
        // The receiver is alive until the end of this function.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let workers = workers.clamp(1, videos.len().max(1));
    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (index, video) in job_rx {
                    let result = harvest_video(client, video);
                    if let Err(err) = &result {
                        error!(short_code = %video.short_code, error = %err, "video failed");
                    }
                    let _ = result_tx.send((index, video.clone(), result));
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<_> = result_rx.into_iter().collect();
    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, video, result)| (video, result))
        .collect()
}

/// Full run: pick a free file next to `output`, list popular videos unless
/// `videos` is given, harvest on `workers` threads, then write and save the
/// workbook. Pacing and page limits come with `client`.
pub fn run<T: Transport>(
    client: &ApiClient<T>,
    output: &Path,
    workers: usize,
    videos: Option<Vec<VideoRef>>,
) -> Result<RunReport> {
    let output = unique_output_path(output);
    info!(output = %output.display(), "output file selected");

    let videos = match videos {
        Some(videos) => videos,
        None => client.list_popular()?,
    };
    if videos.is_empty() {
        warn!("no videos to harvest");
    }

    let results = harvest_all(client, &videos, workers);

    let mut workbook = Workbook::new();
    let mut harvested = Vec::new();
    let mut failed = Vec::new();
    for (video, result) in results {
        match result {
            Ok(harvest) => {
                workbook.append(&harvest.video, &harvest.records);
                harvested.push(harvest);
            }
            Err(err) => failed.push((video, err)),
        }
    }

    workbook.save(&output)?;

    let report = RunReport {
        output,
        workbook,
        harvested,
        failed,
    };
    info!(
        videos = report.harvested.len(),
        partial = report.partial().count(),
        failed = report.failed.len(),
        records = report.total_records(),
        "run complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{POPULAR_URL, comments_url, replies_url, video_page_url};
    use crate::http::testing::{ScriptedTransport, instant_policy};
    use crate::models::{FetchOutcome, NumericVideoId, StopReason, Tier};
    use crate::workbook::{Cell, HEADER};
    use calamine::{Reader, Xlsx, open_workbook};
    use std::fs;
    use tempfile::tempdir;

    const EMPTY_PAGE: &str = r#"{"code":0,"data":{"replies":[]}}"#;

    fn client(transport: ScriptedTransport) -> ApiClient<ScriptedTransport> {
        ApiClient::new(transport, instant_policy(), 20)
    }

    const WORKERS: usize = 5;

    fn state_page(short_code: &str, aid: u64) -> String {
        format!(
            r#"<script>window.__INITIAL_STATE__={{"videoData":{{"bvid":"{short_code}","aid":{aid}}}}};(function(){{}})</script>"#
        )
    }

    fn script_single_comment_video(transport: &ScriptedTransport, short_code: &str, aid: u64) {
        let id = NumericVideoId(aid.to_string());
        transport
            .push(&video_page_url(short_code), 200, &state_page(short_code, aid))
            .push(
                &comments_url(&id, 1),
                200,
                r#"{"code":0,"data":{"replies":[{"rpid":1,"member":{"uname":"A","sex":"男","level_info":{"current_level":3}},"content":{"message":"hi"},"like":0,"ctime":1700000000}]}}"#,
            )
            .push(&comments_url(&id, 2), 200, EMPTY_PAGE)
            .push(&replies_url(&id, 1, 1), 200, EMPTY_PAGE);
    }

    #[test]
    fn end_to_end_single_video() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new();
        transport.push(
            POPULAR_URL,
            200,
            r#"{"code":0,"data":{"list":[{"title":"T","short_link_v2":"https://b23.tv/BV1xx"}]}}"#,
        );
        script_single_comment_video(&transport, "BV1xx", 12345);
        let client = client(transport);

        let output = dir.path().join("comment_output.xlsx");

        let report = run(&client, &output, WORKERS, None).unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.harvested.len(), 1);
        let harvest = &report.harvested[0];
        assert_eq!(harvest.aid, NumericVideoId("12345".into()));
        assert_eq!(harvest.outcome, FetchOutcome::Complete(StopReason::Exhausted));
        assert_eq!(harvest.records.len(), 1);
        assert_eq!(harvest.records[0].tier, Tier::TopLevel);
        assert_eq!(harvest.records[0].replied_to, "");
        assert!(report.output.exists());

        assert_eq!(report.workbook.sheets().len(), 1);
        let sheet = report.workbook.sheet("BV1xx").unwrap();
        assert_eq!(sheet.rows().len(), 2);
        assert_eq!(sheet.rows()[0][0], Cell::from(HEADER[0]));
        assert_eq!(sheet.data_rows()[0][4], Cell::from("一级评论"));
        assert_eq!(sheet.data_rows()[0][3], Cell::from(""));

        let mut saved: Xlsx<_> = open_workbook(&report.output).unwrap();
        assert_eq!(saved.sheet_names(), vec!["BV1xx".to_string()]);
        let range = saved.worksheet_range("BV1xx").unwrap();
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], HEADER.map(String::from).to_vec());
        assert_eq!(rows[1][0], "A");
        assert_eq!(rows[1][1], "男");
        assert_eq!(rows[1][2], "hi");
        assert_eq!(rows[1][3], "");
        assert_eq!(rows[1][4], "一级评论");
        assert_eq!(rows[1][8], "T");
    }

    #[test]
    fn run_never_overwrites_existing_output() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("comment_output.xlsx");
        fs::write(&base, b"previous run").unwrap();
        let client = client(ScriptedTransport::new());

        let report = run(&client, &base, WORKERS, Some(Vec::new())).unwrap();

        assert_eq!(report.output, dir.path().join("comment_output_1.xlsx"));
        assert_eq!(fs::read(&base).unwrap(), b"previous run");
    }

    #[test]
    fn failed_video_is_reported_and_others_survive() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new();
        script_single_comment_video(&transport, "BV1ok", 1);
        transport.push(&video_page_url("BV1gone"), 200, "<html>removed</html>");
        let client = client(transport);
        let videos = vec![VideoRef::new("gone", "BV1gone"), VideoRef::new("ok", "BV1ok")];

        let output = dir.path().join("out.xlsx");

        let report = run(&client, &output, WORKERS, Some(videos)).unwrap();

        assert_eq!(report.harvested.len(), 1);
        assert_eq!(report.harvested[0].video.short_code, "BV1ok");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.short_code, "BV1gone");
        assert!(matches!(report.failed[0].1, HarvestError::AidNotFound { .. }));
    }

    #[test]
    fn refused_comment_listing_is_reported_as_partial() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new();
        transport
            .push(&video_page_url("BV1ban"), 200, &state_page("BV1ban", 7))
            .push(
                &comments_url(&NumericVideoId("7".into()), 1),
                200,
                r#"{"code":-412,"message":"request was banned","data":null}"#,
            );
        let client = client(transport);
        let videos = vec![VideoRef::new("banned", "BV1ban")];

        let report = run(&client, &dir.path().join("out.xlsx"), WORKERS, Some(videos)).unwrap();

        let partial: Vec<&str> = report
            .partial()
            .map(|harvest| harvest.video.short_code.as_str())
            .collect();
        assert_eq!(partial, vec!["BV1ban"]);
    }

    #[test]
    fn harvest_all_returns_results_in_input_order() {
        let transport = ScriptedTransport::new();
        let videos: Vec<VideoRef> = (1..=6)
            .map(|n| VideoRef::new(format!("video {n}"), format!("BV{n}")))
            .collect();
        for (n, video) in videos.iter().enumerate() {
            script_single_comment_video(&transport, &video.short_code, 100 + n as u64);
        }
        let client = client(transport);

        let results = harvest_all(&client, &videos, 3);

        let codes: Vec<&str> = results
            .iter()
            .map(|(video, _)| video.short_code.as_str())
            .collect();
        assert_eq!(codes, vec!["BV1", "BV2", "BV3", "BV4", "BV5", "BV6"]);
        assert!(results.iter().all(|(_, result)| result.is_ok()));
    }

    #[test]
    fn listing_failure_aborts_run() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new();
        transport.push(POPULAR_URL, 502, "");
        let client = client(transport);

        let err = run(&client, &dir.path().join("out.xlsx"), WORKERS, None).unwrap_err();

        assert!(matches!(err, HarvestError::Status { status: 502, .. }));
        assert!(!dir.path().join("out.xlsx").exists());
    }
}

#![forbid(unsafe_code)]

//! Command-line entry point: harvests the comment threads of the current
//! popular videos (or an explicit list) into an `.xlsx` workbook.

use anyhow::{Context, Result, bail};
use clap::Parser;
use comment_harvest_tools::api::ApiClient;
use comment_harvest_tools::config::{SettingsOverrides, read_video_list, resolve_settings};
use comment_harvest_tools::http::UreqTransport;
use comment_harvest_tools::models::VideoRef;
use comment_harvest_tools::pipeline::{RunReport, run};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "harvest_comments", version, about)]
struct Args {
    /// Output workbook; a numeric suffix is added when the file exists.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Page ceiling for comment and reply listings.
    #[arg(long)]
    max_pages: Option<u32>,

    /// Number of videos harvested in parallel.
    #[arg(long)]
    workers: Option<usize>,

    /// Minimum gap between two requests for the same video.
    #[arg(long)]
    page_delay_ms: Option<u64>,

    /// Per-request timeout.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retries after a 429/503 answer.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Harvest this short code instead of the popular list. Repeatable.
    #[arg(long = "video", value_name = "SHORT_CODE")]
    videos: Vec<String>,

    /// File with one `short_code[,title]` per line.
    #[arg(long)]
    video_list: Option<PathBuf>,

    /// Alternative `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            output: self.output.clone(),
            max_pages: self.max_pages,
            workers: self.workers,
            page_delay_ms: self.page_delay_ms,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            env_path: self.env_file.clone(),
        }
    }

    /// `None` means "use the popular list".
    fn explicit_videos(&self) -> Result<Option<Vec<VideoRef>>> {
        let mut videos: Vec<VideoRef> = self
            .videos
            .iter()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .map(|code| VideoRef::new(code, code))
            .collect();
        if let Some(path) = &self.video_list {
            videos.extend(read_video_list(path)?);
        }

        if videos.is_empty() {
            if self.video_list.is_some() || !self.videos.is_empty() {
                bail!("no video short codes given");
            }
            return Ok(None);
        }
        Ok(Some(videos))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = resolve_settings(args.overrides())?;
    let videos = args.explicit_videos()?;

    let client = ApiClient::new(
        UreqTransport::new(settings.request_timeout),
        settings.rate_policy(),
        settings.max_pages,
    );
    let report =
        run(&client, &settings.output, settings.workers, videos).context("harvest failed")?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    info!(
        output = %report.output.display(),
        videos = report.harvested.len(),
        records = report.total_records(),
        "saved workbook"
    );
    for harvest in report.partial() {
        warn!(
            short_code = %harvest.video.short_code,
            kept = harvest.records.len(),
            reply_failures = harvest.reply_failures,
            outcome = ?harvest.outcome,
            "video harvested partially"
        );
    }
    for (video, err) in &report.failed {
        warn!(short_code = %video.short_code, title = %video.title, error = %err, "video skipped");
    }
}

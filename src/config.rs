#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::api::DEFAULT_MAX_PAGES;
use crate::http::RatePolicy;
use crate::models::VideoRef;
use crate::workbook::DEFAULT_OUTPUT;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output: PathBuf,
    pub max_pages: u32,
    pub workers: usize,
    pub page_delay: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            max_pages: DEFAULT_MAX_PAGES,
            workers: DEFAULT_WORKERS,
            page_delay: DEFAULT_PAGE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Settings {
    pub fn rate_policy(&self) -> RatePolicy {
        RatePolicy {
            min_interval: self.page_delay,
            max_retries: self.max_retries,
            ..RatePolicy::default()
        }
    }
}

/// Values given on the command line. They win over the environment, which
/// wins over the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub output: Option<PathBuf>,
    pub max_pages: Option<u32>,
    pub workers: Option<usize>,
    pub page_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let defaults = Settings::default();

    let output = overrides
        .output
        .or_else(|| lookup_value("HARVEST_OUTPUT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or(defaults.output);
    let max_pages = overrides
        .max_pages
        .filter(|value| *value > 0)
        .or_else(|| lookup_positive("HARVEST_MAX_PAGES", file_vars, &env_lookup))
        .unwrap_or(defaults.max_pages);
    let workers = overrides
        .workers
        .filter(|value| *value > 0)
        .or_else(|| lookup_positive("HARVEST_WORKERS", file_vars, &env_lookup))
        .unwrap_or(defaults.workers);
    // Zero is a legal delay, so only unparseable values fall back.
    let page_delay = overrides
        .page_delay_ms
        .or_else(|| {
            lookup_value("HARVEST_PAGE_DELAY_MS", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u64>().ok())
        })
        .map(Duration::from_millis)
        .unwrap_or(defaults.page_delay);
    let request_timeout = overrides
        .timeout_secs
        .filter(|value| *value > 0)
        .or_else(|| lookup_positive("HARVEST_TIMEOUT_SECS", file_vars, &env_lookup))
        .map(Duration::from_secs)
        .unwrap_or(defaults.request_timeout);
    let max_retries = overrides
        .max_retries
        .or_else(|| {
            lookup_value("HARVEST_MAX_RETRIES", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u32>().ok())
        })
        .unwrap_or(defaults.max_retries);

    if output.as_os_str().is_empty() {
        bail!("output path must not be empty");
    }

    Ok(Settings {
        output,
        max_pages,
        workers,
        page_delay,
        request_timeout,
        max_retries,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

fn lookup_positive<N>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<N>
where
    N: std::str::FromStr + PartialOrd + Default,
{
    lookup_value(key, file_vars, env_lookup)
        .and_then(|value| value.trim().parse::<N>().ok())
        .filter(|value| *value > N::default())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value_raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}

/// Reads an explicit video list: one `short_code[,title]` per line. Blank
/// lines and `#` comments are skipped; a missing title defaults to the short
/// code.
pub fn read_video_list(path: &Path) -> Result<Vec<VideoRef>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut videos = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (code, title) = match trimmed.split_once(',') {
            Some((code, title)) => (code.trim(), unquote(title.trim())),
            None => (trimmed, ""),
        };
        if code.is_empty() {
            continue;
        }
        let title = if title.is_empty() { code } else { title };
        videos.push(VideoRef::new(title, code));
    }
    Ok(videos)
}

#![forbid(unsafe_code)]

//! In-memory workbook with one worksheet per video, rendered to `.xlsx` on
//! save.
//!
//! Only the collector thread owns a [`Workbook`]; workers hand over finished
//! [`VideoHarvest`](crate::models::VideoHarvest) values instead of writing
//! into shared sheets.

use rust_xlsxwriter::Workbook as XlsxWorkbook;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{CommentRecord, VideoRef};

pub const DEFAULT_OUTPUT: &str = "./result/comment_output.xlsx";

pub const HEADER: [&str; 9] = [
    "用户昵称",
    "性别",
    "评论内容",
    "被回复用户",
    "评论层级",
    "用户当前等级",
    "点赞数量",
    "回复时间",
    "视频标题",
];

/// Excel refuses longer sheet names.
const MAX_SHEET_NAME: usize = 31;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(i64),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Worksheet {
    short_code: String,
    name: String,
    rows: Vec<Vec<Cell>>,
}

impl Worksheet {
    fn with_header(short_code: &str, name: String) -> Self {
        let header = HEADER.iter().map(|label| Cell::from(*label)).collect();
        Self {
            short_code: short_code.to_string(),
            name,
            rows: vec![header],
        }
    }

    pub fn short_code(&self) -> &str {
        &self.short_code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All rows including the header.
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn data_rows(&self) -> &[Vec<Cell>] {
        &self.rows[1..]
    }
}

fn record_row(record: &CommentRecord, title: &str) -> Vec<Cell> {
    vec![
        Cell::Text(record.author_name.clone()),
        Cell::Text(record.gender.clone()),
        Cell::Text(record.content.clone()),
        Cell::Text(record.replied_to.clone()),
        Cell::from(record.tier.label()),
        Cell::Number(record.level),
        Cell::Number(record.like_count),
        Cell::Text(record.timestamp.clone()),
        Cell::Text(title.to_string()),
    ]
}

#[derive(Debug, Default)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    /// The worksheet holding `short_code`'s rows.
    pub fn sheet(&self, short_code: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|sheet| sheet.short_code == short_code)
    }

    /// Appends one row per record to the video's worksheet, creating it with
    /// the header row on first use.
    pub fn append(&mut self, video: &VideoRef, records: &[CommentRecord]) {
        let position = self
            .sheets
            .iter()
            .position(|sheet| sheet.short_code == video.short_code);
        let index = match position {
            Some(index) => index,
            None => {
                let name = self.free_sheet_name(&sheet_name(&video.short_code));
                self.sheets.push(Worksheet::with_header(&video.short_code, name));
                self.sheets.len() - 1
            }
        };
        let sheet = &mut self.sheets[index];
        sheet
            .rows
            .extend(records.iter().map(|record| record_row(record, &video.title)));
    }

    /// xlsx compares sheet names without case, so `BV1ab` and `BV1AB` need
    /// distinct tabs. Later arrivals get `_2`, `_3`, ... within 31 chars.
    fn free_sheet_name(&self, base: &str) -> String {
        let taken = |candidate: &str| {
            let candidate = candidate.to_lowercase();
            self.sheets
                .iter()
                .any(|sheet| sheet.name.to_lowercase() == candidate)
        };
        if !taken(base) {
            return base.to_string();
        }

        let mut counter = 2u32;
        loop {
            let suffix = format!("_{counter}");
            let stem: String = base.chars().take(MAX_SHEET_NAME - suffix.len()).collect();
            let candidate = format!("{stem}{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Writes the workbook to `path`, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut xlsx = XlsxWorkbook::new();
        for sheet in &self.sheets {
            let worksheet = xlsx.add_worksheet();
            worksheet.set_name(sheet.name.as_str())?;
            for (row_index, row) in sheet.rows.iter().enumerate() {
                let row_index = row_index as u32;
                for (col_index, cell) in row.iter().enumerate() {
                    let col_index = col_index as u16;
                    match cell {
                        Cell::Text(text) => {
                            worksheet.write_string(row_index, col_index, text.as_str())?;
                        }
                        Cell::Number(number) => {
                            worksheet.write_number(row_index, col_index, *number as f64)?;
                        }
                    }
                }
            }
        }
        xlsx.save(path)?;
        Ok(())
    }
}

/// Maps a short code onto a legal worksheet name.
pub fn sheet_name(short_code: &str) -> String {
    let cleaned: String = short_code
        .chars()
        .filter(|ch| !matches!(ch, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(MAX_SHEET_NAME)
        .collect();
    let cleaned = cleaned.trim_matches('\'').to_string();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

/// Returns `base` when it is free, otherwise the first free
/// `<stem>_<n>.<ext>` next to it.
pub fn unique_output_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }

    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "comment_output".to_string());
    let extension = base
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xlsx".to_string());

    let mut counter = 1u32;
    loop {
        let candidate = base.with_file_name(format!("{stem}_{counter}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0/chats";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_ASK_CONTINUE: i64 = 100;

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub target_dir: PathBuf,
    pub state_path: PathBuf,
    pub graph_url: Url,
    pub page_size: u32,
    pub max_messages: Option<u64>,
    pub oldest_date: Option<NaiveDate>,
    pub ask_continue: i64,
    pub refresh_chats: bool,
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Downloaded,
    Skipped,
    Forbidden,
}

/// Calendar date of an ISO-8601 timestamp, tolerant of the variants the
/// service emits: full RFC 3339, naive date-times with or without a trailing
/// `Z` and arbitrary fractional digits, or anything whose date part parses.
pub fn parse_loose_date(iso: &str) -> Option<NaiveDate> {
    let iso = iso.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(iso) {
        return Some(dt.date_naive());
    }
    let naive = iso.trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    let date_part = iso.split('T').next().unwrap_or(iso);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One captured clipboard item as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardEntry {
    pub id: i64,
    pub content: String,
    /// ISO-8601 capture time, immutable.
    #[serde(rename = "localDateTime")]
    pub captured_at: String,
    #[serde(rename = "isPinned")]
    pub is_pinned: bool,
}

impl ClipboardEntry {
    pub fn new(id: i64, content: impl Into<String>, captured_at: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            captured_at: captured_at.into(),
            is_pinned: false,
        }
    }

    pub fn pinned(mut self, is_pinned: bool) -> Self {
        self.is_pinned = is_pinned;
        self
    }

    /// Capture time as a naive local date-time. Accepts RFC 3339 or a zone-less ISO-8601 value.
    pub fn captured_time(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.captured_at)
    }

    /// Newest first. Unparseable timestamps go last and fall back to string order.
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        match (self.captured_time(), other.captured_time()) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => other.captured_at.cmp(&self.captured_at),
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        query.trim().is_empty() || self.content.to_lowercase().contains(&query.to_lowercase())
    }
}

pub fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Server DTO with every field optional, as a generated client would see it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntryDto {
    pub id: Option<i64>,
    pub content: Option<String>,
    #[serde(rename = "localDateTime", alias = "capturedAt", alias = "timestamp")]
    pub captured_at: Option<String>,
    #[serde(rename = "isPinned", alias = "pinned")]
    pub is_pinned: Option<bool>,
}

impl EntryDto {
    /// Fill missing fields with fixed defaults (id 0, empty content, now, unpinned).
    pub fn normalize(self) -> ClipboardEntry {
        ClipboardEntry {
            id: self.id.unwrap_or(0),
            content: self.content.unwrap_or_default(),
            captured_at: self
                .captured_at
                .unwrap_or_else(|| Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            is_pinned: self.is_pinned.unwrap_or(false),
        }
    }

    /// Strict variant for pushed events: an entry without an id cannot be reconciled.
    pub fn into_event_entry(self) -> Option<ClipboardEntry> {
        self.id?;
        Some(self.normalize())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClipboardStats {
    pub total_entries: u64,
    pub pinned_entries: u64,
    pub unpinned_entries: u64,
    pub oldest_entry: String,
    pub newest_entry: String,
}

/// Spring-style page envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub number: u32,
    pub size: u32,
    pub first: bool,
    pub last: bool,
    pub empty: bool,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            content: Vec::new(),
            total_elements: 0,
            total_pages: 0,
            number: 0,
            size: 0,
            first: true,
            last: true,
            empty: true,
        }
    }
}

impl<T> Page<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            number: self.number,
            size: self.size,
            first: self.first,
            last: self.last,
            empty: self.empty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Csv,
    Txt,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Txt => "txt",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv | ExportFormat::Txt => "text/plain",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(format!("Unknown export format: {}", other)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

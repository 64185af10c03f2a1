//! Single-column decoders: base64 text, unix timestamps and HTML markup
//!
//! A value that cannot be decoded yields a sentinel and a warning; the row is
//! never rejected.

use crate::enrich::{Enricher, RowRef};
use crate::error::Result;
use crate::melt::types::Cell;
use crate::BatchContext;
use base64::Engine;
use chrono::DateTime;
use scraper::Html;
use tracing::warn;

/// Sentinel for base64 payloads that do not decode
pub const NOT_LATIN1: &str = "??Not-latin1 text";

/// Columns holding unix timestamps in seconds
pub const TIMESTAMP_COLUMNS: &[&str] = &[
    "timestart",
    "timefinish",
    "added",
    "backup_date",
    "original_course_startdate",
    "original_course_enddate",
    "timeadded",
    "firstaccess",
    "lastaccess",
    "lastlogin",
    "currentlogin",
    "timecreated",
    "timemodified",
    "created",
    "modified",
];

/// Columns holding HTML fragments
pub const MARKUP_COLUMNS: &[&str] = &[
    "message",
    "description",
    "commenttext",
    "intro",
    "conclusion",
    "summary",
    "feedbacktext",
    "content",
    "feedback",
    "info",
    "questiontext",
    "answertext",
];

/// Columns holding base64 encoded latin-1 text
pub const BASE64_COLUMNS: &[&str] = &["other", "configdata"];

/// Decodes base64 payloads into latin-1 text under `<col>_base64`
pub struct Base64Decoder;

impl Base64Decoder {
    pub fn decode(encoded: &str) -> String {
        match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
            // Every byte is a latin-1 code point
            Ok(bytes) => bytes.iter().map(|&b| b as char).collect(),
            Err(err) => {
                warn!(error = %err, "Not base64 latin1 text");
                NOT_LATIN1.to_string()
            }
        }
    }
}

impl Enricher for Base64Decoder {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn enrich(&self, row: &RowRef<'_>, _ctx: &mut BatchContext) -> Result<Vec<(String, Cell)>> {
        Ok(BASE64_COLUMNS
            .iter()
            .filter_map(|&col| {
                let value = row.row.get(col)?;
                Some((format!("{}_base64", col), Cell::Text(Self::decode(&value.to_string()))))
            })
            .collect())
    }
}

/// Renders unix timestamps as UTC text, and optionally as milliseconds
///
/// Timestamps are taken as UTC as-is; no timezone adjustment is applied.
pub struct TimestampDecoder {
    pub milliseconds: bool,
}

impl TimestampDecoder {
    pub fn new(milliseconds: bool) -> Self {
        TimestampDecoder { milliseconds }
    }

    /// `%Y-%m-%d %H:%M:%S`, or empty text for blank and bad input
    pub fn to_utc(seconds: &str) -> String {
        if seconds.is_empty() {
            return String::new();
        }
        let parsed = seconds
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0));
        match parsed {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => {
                warn!(value = seconds, "Bad unix timestamp");
                String::new()
            }
        }
    }

    /// Milliseconds since the epoch, or null for blank and bad input
    pub fn to_milliseconds(seconds: &str) -> Cell {
        if seconds.is_empty() {
            return Cell::Null;
        }
        match seconds.trim().parse::<f64>() {
            Ok(s) if s.is_finite() => Cell::Float(1000.0 * s),
            _ => {
                warn!(value = seconds, "Bad unix timestamp");
                Cell::Null
            }
        }
    }
}

impl Enricher for TimestampDecoder {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn enrich(&self, row: &RowRef<'_>, _ctx: &mut BatchContext) -> Result<Vec<(String, Cell)>> {
        let mut out = Vec::new();
        for &col in TIMESTAMP_COLUMNS {
            let Some(value) = row.row.get(col) else {
                continue;
            };
            let seconds = value.to_string();
            out.push((format!("{}_utc", col), Cell::Text(Self::to_utc(&seconds))));
            if self.milliseconds {
                out.push((format!("{}_ms", col), Self::to_milliseconds(&seconds)));
            }
        }
        Ok(out)
    }
}

/// Extracts the visible text of HTML fragments under `<col>_text`
pub struct MarkupDecoder;

impl MarkupDecoder {
    pub fn to_text(html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }
        let fragment = Html::parse_fragment(html);
        fragment.root_element().text().collect()
    }
}

impl Enricher for MarkupDecoder {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn enrich(&self, row: &RowRef<'_>, _ctx: &mut BatchContext) -> Result<Vec<(String, Cell)>> {
        Ok(MARKUP_COLUMNS
            .iter()
            .filter_map(|&col| {
                let value = row.row.get(col)?;
                Some((format!("{}_text", col), Cell::Text(Self::to_text(&value.to_string()))))
            })
            .collect())
    }
}

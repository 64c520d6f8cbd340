//! Filename Pattern Expander
//!
//! Patterns are compiled once against the data headers, so an unknown column
//! fails the run before any file is written. Placeholders:
//!
//! | Placeholder            | Expands to                                       |
//! |------------------------|--------------------------------------------------|
//! | `{column}` `%column%`  | the row's value for `column`                     |
//! | `{count}` `{count:N}`  | 1-based position in the filtered rows, padded    |
//! | `{date}` `{date:FMT}`  | run start date; FMT is an alias or strftime      |
//! | `{time}`               | run start time, `HH-MM-SS`                       |
//! | `{timestamp}`          | run start, `YYYYMMDD_HHMMSS`                     |
//!
//! `count`, `date`, `time` and `timestamp` are reserved and win over columns of
//! the same name.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{ExportFormat, MAX_COUNT_WIDTH};
use crate::error::{AutogenError, Result};
use crate::loader::RowRecord;
use crate::sanitize;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H-%M-%S";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{([^{}]+)\}|%([^%\s]+)%").unwrap();
}

fn date_alias(format: &str) -> Option<&'static str> {
    match format {
        "yyyymmdd" => Some("%Y%m%d"),
        "yyyy-mm-dd" => Some("%Y-%m-%d"),
        "dd-MMM-yyyy" => Some("%d-%b-%Y"),
        "MMM-dd-yyyy" => Some("%b-%d-%Y"),
        "dd/mm/yyyy" => Some("%d/%m/%Y"),
        "mm/dd/yyyy" => Some("%m/%d/%Y"),
        _ => None,
    }
}

/// Values shared by every row of one run. The clock is read once.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub started: DateTime<Local>,
    pub count_width: usize,
    pub format: ExportFormat,
}

impl RunContext {
    pub fn new(format: ExportFormat, count_width: usize) -> Self {
        Self {
            started: Local::now(),
            count_width,
            format,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Column(String),
    Count(Option<usize>),
    Date(String),
    Time,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    source: String,
    segments: Vec<Segment>,
}

impl FilenamePattern {
    /// Parse `pattern` and check every column placeholder against `headers`.
    pub fn compile(pattern: &str, headers: &[String]) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(pattern) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(Segment::Literal(pattern[last..whole.start()].to_string()));
            }
            last = whole.end();

            let segment = match (caps.get(1), caps.get(2)) {
                (Some(inner), _) => parse_braced(inner.as_str().trim())?,
                (None, Some(name)) => Segment::Column(name.as_str().to_string()),
                (None, None) => continue,
            };
            if let Segment::Column(name) = &segment {
                if !headers.iter().any(|h| h == name) {
                    return Err(AutogenError::configuration(format!(
                        "filename pattern '{}' uses unknown column '{}'",
                        pattern, name
                    )));
                }
            }
            segments.push(segment);
        }
        if last < pattern.len() {
            segments.push(Segment::Literal(pattern[last..].to_string()));
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand for one row. `count` is the 1-based position in the filtered rows.
    /// The result is a safe file name with the export extension.
    pub fn expand(&self, row: &RowRecord, count: usize, ctx: &RunContext) -> Result<String> {
        let mut stem = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => stem.push_str(text),
                Segment::Column(name) => stem.push_str(row.get(name).unwrap_or("")),
                Segment::Count(width) => {
                    let width = width.unwrap_or(ctx.count_width);
                    stem.push_str(&format!("{:0width$}", count, width = width));
                }
                Segment::Date(format) => stem.push_str(&ctx.started.format(format).to_string()),
                Segment::Time => stem.push_str(&ctx.started.format(TIME_FORMAT).to_string()),
                Segment::Timestamp => {
                    stem.push_str(&ctx.started.format(TIMESTAMP_FORMAT).to_string())
                }
            }
        }

        let extension = ctx.format.extension();
        let stem = stem.trim();
        let stem = if stem
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", extension))
        {
            &stem[..stem.len() - extension.len() - 1]
        } else {
            stem
        };

        let safe = sanitize::sanitize_filename(stem)?;
        Ok(format!("{}.{}", safe, extension))
    }
}

fn parse_braced(inner: &str) -> Result<Segment> {
    let (name, arg) = match inner.split_once(':') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (inner, None),
    };

    let segment = match (name, arg) {
        ("count", None) => Segment::Count(None),
        ("count", Some(width)) => {
            let width: usize = width.parse().map_err(|_| {
                AutogenError::configuration(format!("invalid count width '{}'", width))
            })?;
            if width > MAX_COUNT_WIDTH {
                return Err(AutogenError::configuration(format!(
                    "count width {} exceeds {}",
                    width, MAX_COUNT_WIDTH
                )));
            }
            Segment::Count(Some(width))
        }
        ("date", None) => Segment::Date(DEFAULT_DATE_FORMAT.to_string()),
        ("date", Some(format)) => Segment::Date(validate_date_format(format)?),
        ("time", None) => Segment::Time,
        ("timestamp", None) => Segment::Timestamp,
        _ => Segment::Column(inner.to_string()),
    };
    Ok(segment)
}

fn validate_date_format(format: &str) -> Result<String> {
    if let Some(alias) = date_alias(format) {
        return Ok(alias.to_string());
    }
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(AutogenError::configuration(format!(
            "invalid date format '{}'",
            format
        )));
    }
    Ok(format.to_string())
}

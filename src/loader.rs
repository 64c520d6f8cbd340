//! Tabular Data Loader
//!
//! Reads a delimited text file of unknown encoding into an ordered sequence of
//! immutable row records. Structural problems are `DataFormatError`s raised
//! before any row is processed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::RunCache;
use crate::config::Config;
use crate::encoding::{self, DetectionMethod};
use crate::error::{AutogenError, Result};

pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const DELIMITER_CANDIDATES: [u8; 3] = [b',', b';', b'\t'];

// ═══════════════════════════════════════════════════════════════════════════════
// ROW RECORD
// ═══════════════════════════════════════════════════════════════════════════════

/// One data row. Column order follows the header; lookups are by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    columns: Arc<Vec<String>>,
    values: Vec<String>,
}

impl RowRecord {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<String>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a record from `(column, value)` pairs, mainly for tests and callers
    /// that assemble rows in memory.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: Vec<(K, V)>) -> Self {
        let (columns, values): (Vec<String>, Vec<String>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self {
            columns: Arc::new(columns),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i].as_str())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DATASET
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct Truncation {
    pub total_rows: usize,
    pub kept_rows: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions<'a> {
    pub max_rows: usize,
    pub truncate: bool,
    pub lenient: bool,
    pub encoding: &'a str,
}

impl<'a> LoadOptions<'a> {
    pub fn from_config(config: &'a Config) -> Self {
        Self {
            max_rows: config.max_rows,
            truncate: config.truncate_rows,
            lenient: config.lenient_rows,
            encoding: &config.encoding,
        }
    }
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self {
            max_rows: crate::config::DEFAULT_MAX_ROWS,
            truncate: false,
            lenient: false,
            encoding: "autodetect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub source: Option<PathBuf>,
    pub headers: Arc<Vec<String>>,
    pub rows: Vec<RowRecord>,
    pub encoding: &'static str,
    pub detection: DetectionMethod,
    pub delimiter: u8,
    pub truncation: Option<Truncation>,
    pub fingerprint: String,
}

impl Dataset {
    /// Directory the data file lives in; image lookups start here.
    pub fn base_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }
}

/// Load a data file from disk.
pub fn load(path: &Path, options: LoadOptions<'_>, cache: &mut RunCache) -> Result<Dataset> {
    let metadata = fs::metadata(path).map_err(|e| AutogenError::io(path, e))?;
    if metadata.len() > MAX_FILE_SIZE {
        return Err(AutogenError::data_format(format!(
            "{} is {} bytes, larger than the {} byte limit",
            path.display(),
            metadata.len(),
            MAX_FILE_SIZE
        )));
    }

    let bytes = fs::read(path).map_err(|e| AutogenError::io(path, e))?;
    info!("loading data file {} ({} bytes)", path.display(), bytes.len());

    let mut dataset = load_bytes(&bytes, options, cache)?;
    dataset.source = Some(path.to_path_buf());
    Ok(dataset)
}

/// Load a data file already read into memory.
pub fn load_bytes(bytes: &[u8], options: LoadOptions<'_>, cache: &mut RunCache) -> Result<Dataset> {
    if bytes.is_empty() {
        return Err(AutogenError::data_format("data file is empty"));
    }

    let fingerprint = RunCache::compute_hash(bytes);
    let decoded = if options.encoding.eq_ignore_ascii_case("autodetect") {
        match cache.encoding_for(&fingerprint) {
            Some(known) => encoding::decode_with_label(bytes, known.name())?,
            None => encoding::detect_and_decode(bytes)?,
        }
    } else {
        encoding::decode_with_label(bytes, options.encoding)?
    };
    cache.remember_encoding(&fingerprint, decoded.encoding);
    debug!(
        "decoded data as {} ({:?})",
        decoded.encoding.name(),
        decoded.method
    );

    let text = decoded.text.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(text);
    let (headers, mut rows) = parse_table(text, delimiter, options.lenient)?;

    if rows.is_empty() {
        return Err(AutogenError::data_format("data file has a header but no data rows"));
    }

    let mut truncation = None;
    if rows.len() > options.max_rows {
        if !options.truncate {
            return Err(AutogenError::data_format(format!(
                "data file has {} rows, more than the limit of {}",
                rows.len(),
                options.max_rows
            )));
        }
        warn!(
            "data file has {} rows; truncating to the first {}",
            rows.len(),
            options.max_rows
        );
        truncation = Some(Truncation {
            total_rows: rows.len(),
            kept_rows: options.max_rows,
        });
        rows.truncate(options.max_rows);
    }

    info!("loaded {} row(s), {} column(s)", rows.len(), headers.len());

    Ok(Dataset {
        source: None,
        headers,
        rows,
        encoding: decoded.encoding.name(),
        detection: decoded.method,
        delimiter,
        truncation,
        fingerprint,
    })
}

/// Pick the candidate delimiter that occurs most often in the header line.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    DELIMITER_CANDIDATES
        .iter()
        .copied()
        .map(|d| (d, header.bytes().filter(|&b| b == d).count()))
        .filter(|&(_, n)| n > 0)
        .max_by_key(|&(_, n)| n)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

fn parse_table(
    text: &str,
    delimiter: u8,
    lenient: bool,
) -> Result<(Arc<Vec<String>>, Vec<RowRecord>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let header_record = reader
        .headers()
        .map_err(|e| AutogenError::data_format(format!("cannot read header row: {}", e)))?
        .clone();

    let mut headers = Vec::with_capacity(header_record.len());
    for (i, raw) in header_record.iter().enumerate() {
        let name = raw.trim().to_string();
        if name.is_empty() {
            return Err(AutogenError::data_format(format!(
                "header column {} has no name",
                i + 1
            )));
        }
        if headers.contains(&name) {
            return Err(AutogenError::data_format(format!(
                "duplicate header column '{}'",
                name
            )));
        }
        headers.push(name);
    }
    if headers.is_empty() {
        return Err(AutogenError::data_format("data file has no header row"));
    }
    let headers = Arc::new(headers);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let line = i + 2;
        let record = record
            .map_err(|e| AutogenError::data_format(format!("line {}: {}", line, e)))?;
        let mut values: Vec<String> = record.iter().map(str::to_string).collect();

        if values.len() != headers.len() {
            let surplus_is_blank = values.len() > headers.len()
                && values[headers.len()..].iter().all(|v| v.trim().is_empty());
            if !lenient || (values.len() > headers.len() && !surplus_is_blank) {
                return Err(AutogenError::data_format(format!(
                    "line {} has {} field(s), header has {}",
                    line,
                    values.len(),
                    headers.len()
                )));
            }
            debug!(
                "line {}: padding {} field(s) to header width {}",
                line,
                values.len(),
                headers.len()
            );
            values.resize(headers.len(), String::new());
        }

        rows.push(RowRecord::new(Arc::clone(&headers), values));
    }

    Ok((headers, rows))
}

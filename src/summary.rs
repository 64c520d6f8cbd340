//! Per-run summary of everything that did not abort the run.
//!
//! Row and cell failures are counted by kind; the first few offending row
//! numbers (1-based, file order) are kept per kind.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AutogenError, ErrorKind, Result};
use crate::loader::Truncation;
use crate::transform::CellOutcome;

/// What happened to one selected row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowReport {
    /// 1-based, file order.
    pub row: usize,
    /// 1-based position among the selected rows.
    pub count: usize,
    pub file: Option<PathBuf>,
    pub cells: Vec<CellOutcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub template_fingerprint: String,
    pub data_fingerprint: String,
    pub encoding: String,
    pub rows_total: usize,
    pub rows_selected: usize,
    pub rows_succeeded: usize,
    pub counts: BTreeMap<ErrorKind, usize>,
    pub offending_rows: BTreeMap<ErrorKind, Vec<usize>>,
    pub unresolved_columns: Vec<String>,
    pub generated: Vec<PathBuf>,
    pub skipped_files: Vec<PathBuf>,
    pub merged: Option<PathBuf>,
    pub merge_error: Option<String>,
    /// Per-row PDFs removed after a successful merge.
    pub deleted: Vec<PathBuf>,
    pub dry_run: bool,
    pub truncation: Option<Truncation>,
    pub cancelled: bool,
    /// Why the run stopped early, when it did.
    pub aborted: Option<String>,
    pub rows: Vec<RowReport>,
    #[serde(skip)]
    row_limit: usize,
}

impl RunSummary {
    pub fn new(row_limit: usize) -> Self {
        Self {
            row_limit,
            ..Self::default()
        }
    }

    /// Count one failure of `kind` on `row_number` (1-based).
    pub fn record(&mut self, kind: ErrorKind, row_number: usize) {
        *self.counts.entry(kind).or_insert(0) += 1;
        let rows = self.offending_rows.entry(kind).or_default();
        if rows.len() < self.row_limit && rows.last() != Some(&row_number) {
            rows.push(row_number);
        }
    }

    pub fn record_unresolved(&mut self, column: &str) {
        *self.counts.entry(ErrorKind::ResolutionMiss).or_insert(0) += 1;
        self.unresolved_columns.push(column.to_string());
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn rows_for(&self, kind: ErrorKind) -> &[usize] {
        self.offending_rows
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_failures(&self) -> bool {
        self.aborted.is_some()
            || self.merge_error.is_some()
            || self
                .counts
                .iter()
                .any(|(kind, n)| *kind != ErrorKind::ResolutionMiss && *n > 0)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AutogenError::render(format!("cannot serialize run summary: {}", e)))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|e| AutogenError::io(path, e))
    }

    /// One log line per category.
    pub fn log(&self) {
        info!(
            "{} of {} selected row(s) produced output ({} generated, {} skipped)",
            self.rows_succeeded,
            self.rows_selected,
            self.generated.len(),
            self.skipped_files.len()
        );
        if let Some(t) = &self.truncation {
            warn!("input truncated: kept {} of {} rows", t.kept_rows, t.total_rows);
        }
        for (kind, n) in &self.counts {
            if *kind == ErrorKind::ResolutionMiss {
                warn!(
                    "{} column(s) match no template node: {}",
                    n,
                    self.unresolved_columns.join(", ")
                );
            } else {
                warn!("{:?}: {} failure(s), first rows {:?}", kind, n, self.rows_for(*kind));
            }
        }
        if let Some(err) = &self.merge_error {
            warn!("merge failed: {}", err);
        }
        if self.cancelled {
            warn!("run cancelled before all rows were processed");
        }
        if let Some(reason) = &self.aborted {
            warn!("run aborted: {}", reason);
        }
    }
}

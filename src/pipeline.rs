//! Batch orchestration.
//!
//! Everything that can fail the whole run (config, template, data file,
//! classification, filename pattern) is checked before the first row. After
//! that, failures are row or cell scoped and land in the `RunSummary`.
//!
//! Rows are transformed, named and planned strictly in filtered order. Only the
//! render step of a batch runs on the worker pool; writes happen afterwards in
//! row order. The cancel flag is checked between batches, so a render already
//! in flight finishes and is written whole.

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::RunCache;
use crate::classify::classify;
use crate::config::{Config, ExportFormat};
use crate::error::{AutogenError, ErrorKind, Result};
use crate::image::SearchContext;
use crate::index::build_index;
use crate::loader::{self, LoadOptions};
use crate::naming::{FilenamePattern, RunContext};
use crate::output::{OutputWriter, Planned};
use crate::range::RowFilter;
use crate::render::{PdfMerger, Renderer};
use crate::summary::{RowReport, RunSummary};
use crate::template::Document;
use crate::transform::{TransformOptions, Transformer};

const MERGED_FILE_NAME: &str = "merged.pdf";

#[derive(Debug, Clone)]
pub struct RunInputs {
    pub template: PathBuf,
    pub data: PathBuf,
    pub output_dir: PathBuf,
    /// Transform and name every row without rendering or writing.
    pub dry_run: bool,
}

/// A row that made it through transform and naming, waiting for render.
struct Job {
    row_number: usize,
    document: Document,
    target: PathBuf,
    report: RowReport,
}

/// Run one batch with a fresh cache.
pub fn run(
    inputs: &RunInputs,
    config: &Config,
    renderer: &dyn Renderer,
    merger: Option<&dyn PdfMerger>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let mut cache = RunCache::new();
    run_with_cache(inputs, config, renderer, merger, cancel, &mut cache)
}

pub fn run_with_cache(
    inputs: &RunInputs,
    config: &Config,
    renderer: &dyn Renderer,
    merger: Option<&dyn PdfMerger>,
    cancel: Arc<AtomicBool>,
    cache: &mut RunCache,
) -> Result<RunSummary> {
    // Phase 1: everything fatal.
    config.validate()?;
    let format = config.export_format;
    if !inputs.dry_run && !renderer.supports(format) {
        return Err(AutogenError::configuration(format!(
            "the configured renderer cannot produce {}",
            format
        )));
    }
    if config.merge_outputs && !inputs.dry_run && merger.is_none() {
        return Err(AutogenError::configuration(
            "merge_outputs is set but no PDF merger is available",
        ));
    }
    let filter = match &config.row_range {
        Some(expression) => RowFilter::parse(expression)?,
        None => RowFilter::all(),
    };

    let template = load_template(&inputs.template, cache)?;
    for warning in template.check() {
        warn!("template: {}", warning);
    }

    let dataset = loader::load(&inputs.data, LoadOptions::from_config(config), cache)?;
    let index = build_index(&template);
    let classification = classify(
        dataset.headers.iter().map(String::as_str),
        &template,
        &index,
    )?;
    info!(
        "{} column(s): {} element, {} property, {} visibility",
        classification.total(),
        classification.element_keys.len(),
        classification.property_keys.len(),
        classification.visibility_keys.len()
    );

    let pattern = FilenamePattern::compile(&config.filename_pattern, &dataset.headers)?;
    let selected = filter.select(dataset.rows.len());

    let mut summary = RunSummary::new(config.summary_row_limit);
    summary.template_fingerprint = template.fingerprint.clone();
    summary.data_fingerprint = dataset.fingerprint.clone();
    summary.encoding = dataset.encoding.to_string();
    summary.rows_total = dataset.rows.len();
    summary.rows_selected = selected.len();
    summary.truncation = dataset.truncation.clone();
    summary.dry_run = inputs.dry_run;

    for column in &classification.misses {
        if cache.first_miss(column) {
            warn!("column '{}' matches no template node", column);
            summary.record_unresolved(column);
        }
    }

    let mut images = SearchContext::new(config, dataset.base_dir(), template.base_dir());
    if config.use_relative_image_paths {
        images = images.with_relative_output(&inputs.output_dir);
    }
    let transformer = Transformer::new(
        &template,
        &index,
        &classification,
        &images,
        TransformOptions {
            strict_validation: config.strict_validation,
            max_value_length: config.max_value_length,
            remove_hidden_layers: config.remove_hidden_layers,
        },
    );
    let ctx = RunContext::new(format, config.count_width);
    let mut writer = OutputWriter::new(&inputs.output_dir, config.collision_policy())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.render_workers)
        .build()
        .map_err(|e| AutogenError::configuration(format!("cannot start render pool: {}", e)))?;

    // Phase 2: rows.
    let numbered: Vec<(usize, usize)> = selected
        .iter()
        .enumerate()
        .map(|(position, &index)| (position + 1, index))
        .collect();
    let mut merge_parts: Vec<Vec<u8>> = Vec::new();
    let mut merged_files: Vec<PathBuf> = Vec::new();

    'batches: for batch in numbered.chunks(config.render_workers) {
        if cancel.load(Ordering::SeqCst) {
            info!("cancelled; {} row(s) not processed", summary.rows_selected - summary.rows.len());
            summary.cancelled = true;
            break;
        }

        let mut jobs = Vec::with_capacity(batch.len());
        for &(count, row_index) in batch {
            let row_number = row_index + 1;
            let row = &dataset.rows[row_index];

            let transformed = match transformer.transform(row_number, row) {
                Ok(transformed) => transformed,
                Err(err) => {
                    warn!("row {}: {}", row_number, err);
                    summary.record(err.kind(), row_number);
                    summary.rows.push(RowReport {
                        row: row_number,
                        count,
                        file: None,
                        cells: Vec::new(),
                    });
                    if err.kind() == ErrorKind::Security && !config.skip_on_security {
                        summary.aborted = Some(format!("row {}: {}", row_number, err));
                        break 'batches;
                    }
                    continue;
                }
            };
            for _ in &transformed.stripped {
                summary.record(ErrorKind::Security, row_number);
            }
            for (_, kind, _) in transformed.rejections() {
                summary.record(kind, row_number);
            }

            let mut report = RowReport {
                row: row_number,
                count,
                file: None,
                cells: transformed.cells,
            };

            let planned = pattern
                .expand(row, count, &ctx)
                .and_then(|name| writer.plan(&name));
            let target = match planned {
                Ok(Planned::Write(target)) => target,
                Ok(Planned::Skip(target)) => {
                    info!("row {}: {} exists, skipped", row_number, target.display());
                    summary.skipped_files.push(target);
                    summary.rows.push(report);
                    continue;
                }
                Err(err) => {
                    warn!("row {}: cannot name output: {}", row_number, err);
                    summary.record(err.kind(), row_number);
                    summary.rows.push(report);
                    continue;
                }
            };

            if inputs.dry_run {
                debug!("row {}: would write {}", row_number, target.display());
                report.file = Some(target.clone());
                summary.generated.push(target);
                summary.rows_succeeded += 1;
                summary.rows.push(report);
                continue;
            }

            jobs.push(Job {
                row_number,
                document: transformed.document,
                target,
                report,
            });
        }

        let rendered: Vec<Result<Vec<u8>>> = pool.install(|| {
            jobs.par_iter()
                .map(|job| renderer.render(&job.document, format, config.dpi))
                .collect()
        });

        for (job, result) in jobs.into_iter().zip(rendered) {
            let Job {
                row_number,
                target,
                mut report,
                ..
            } = job;

            let written = result.and_then(|bytes| {
                writer.write(&target, &bytes)?;
                Ok(bytes)
            });
            match written {
                Ok(bytes) => {
                    if config.merge_outputs && format == ExportFormat::Pdf {
                        merge_parts.push(bytes);
                        merged_files.push(target.clone());
                    }
                    report.file = Some(target.clone());
                    summary.generated.push(target);
                    summary.rows_succeeded += 1;
                    summary.rows.push(report);
                }
                Err(err) => {
                    warn!("row {}: {}", row_number, err);
                    summary.record(err.kind(), row_number);
                    summary.rows.push(report);
                    if err.kind() == ErrorKind::Render && config.abort_on_render_failure {
                        summary.aborted = Some(format!("row {}: {}", row_number, err));
                        break 'batches;
                    }
                }
            }
        }
    }

    if let Some(merger) = merger.filter(|_| config.merge_outputs && !merge_parts.is_empty()) {
        merge(merger, &merge_parts, &mut writer, &mut summary);
        if config.delete_individual_pdfs && summary.merged.is_some() {
            delete_merged_parts(&merged_files, &mut summary);
        }
    }

    summary.log();
    Ok(summary)
}

/// Parse the template, or reuse the canonical tree if identical bytes were
/// parsed earlier with this cache.
fn load_template(path: &Path, cache: &mut RunCache) -> Result<Arc<Document>> {
    let bytes = fs::read(path).map_err(|e| AutogenError::io(path, e))?;
    let fingerprint = RunCache::compute_hash(&bytes);
    if let Some(cached) = cache.template_for(&fingerprint) {
        debug!("template {} unchanged, reusing parsed tree", path.display());
        return Ok(cached);
    }
    let document = Arc::new(Document::from_bytes(bytes, path)?);
    cache.remember_template(&fingerprint, Arc::clone(&document));
    Ok(document)
}

fn merge(
    merger: &dyn PdfMerger,
    parts: &[Vec<u8>],
    writer: &mut OutputWriter,
    summary: &mut RunSummary,
) {
    let merged = merger.merge(parts).and_then(|bytes| match writer.plan(MERGED_FILE_NAME)? {
        Planned::Write(target) => {
            writer.write(&target, &bytes)?;
            Ok(Some(target))
        }
        Planned::Skip(target) => {
            summary.skipped_files.push(target);
            Ok(None)
        }
    });
    match merged {
        Ok(Some(target)) => {
            info!("merged {} PDF(s) into {}", parts.len(), target.display());
            summary.merged = Some(target);
        }
        Ok(None) => {}
        Err(err) => summary.merge_error = Some(err.to_string()),
    }
}

/// Remove per-row PDFs that are now part of the merged file. A file that
/// cannot be removed stays listed in `generated`.
fn delete_merged_parts(parts: &[PathBuf], summary: &mut RunSummary) {
    let mut deleted = 0usize;
    for part in parts {
        match fs::remove_file(part) {
            Ok(()) => {
                summary.generated.retain(|path| path != part);
                summary.deleted.push(part.clone());
                deleted += 1;
            }
            Err(err) => warn!("cannot delete {}: {}", part.display(), err),
        }
    }
    info!("deleted {} individual PDF(s) after merging", deleted);
}

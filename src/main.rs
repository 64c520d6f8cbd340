use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

use svg_autogen::config::{CollisionPolicy, Config, ExportFormat};
use svg_autogen::export;
use svg_autogen::pipeline::{self, RunInputs};
use svg_autogen::render::{InkscapeRenderer, PdfMerger, PdfUniteMerger, Renderer, SvgRenderer};
use svg_autogen::template::Document;

/// Generate one output file per data row from a labeled SVG template.
#[derive(Debug, Parser)]
#[command(name = "svg-autogen", version)]
struct Args {
    /// SVG template with labeled nodes
    template: PathBuf,

    /// CSV/TSV data file; the header row names template labels
    #[arg(required_unless_present = "export_csv")]
    data: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    out: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Row filter, e.g. "1-3,6" or "even"
    #[arg(short, long)]
    rows: Option<String>,

    /// Export format (png, pdf, svg, jpg, eps, ps, tiff, webp)
    #[arg(short, long)]
    format: Option<ExportFormat>,

    #[arg(long)]
    dpi: Option<u32>,

    /// Output filename pattern, e.g. "cert_{name}_{count}"
    #[arg(short = 'p', long)]
    pattern: Option<String>,

    /// What to do when an output file already exists
    #[arg(long)]
    collision: Option<CollisionPolicy>,

    /// Merge all PDF outputs into one file
    #[arg(long)]
    merge: bool,

    /// Delete the per-row PDFs after a successful merge
    #[arg(long)]
    delete_pdfs: bool,

    /// Number of parallel render workers
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Treat unsafe cell content as a row error
    #[arg(long)]
    strict: bool,

    /// Transform and name every row without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write a starter data file for the template into this directory and exit
    #[arg(long, value_name = "DIR")]
    export_csv: Option<PathBuf>,

    /// -v for info, -vv for debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(rows) = &self.rows {
            config.row_range = Some(rows.clone());
        }
        if let Some(format) = self.format {
            config.export_format = format;
        }
        if let Some(dpi) = self.dpi {
            config.dpi = dpi;
        }
        if let Some(pattern) = &self.pattern {
            config.filename_pattern = pattern.clone();
        }
        if let Some(collision) = self.collision {
            config.collision = Some(collision);
        }
        if let Some(workers) = self.workers {
            config.render_workers = workers;
        }
        config.merge_outputs |= self.merge;
        config.delete_individual_pdfs |= self.delete_pdfs;
        config.strict_validation |= self.strict;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Some(dir) = &args.export_csv {
        let template = Document::load(&args.template)
            .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))?;
        let path = export::write_starter_csv(&template, dir)
            .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))?;
        println!("starter data file written to {}", path.display());
        return Ok(());
    }
    let Some(data) = args.data.clone() else {
        anyhow::bail!("a data file is required");
    };

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);
    debug!("{:?}", config);

    let renderer: Box<dyn Renderer> = if config.export_format == ExportFormat::Svg {
        Box::new(SvgRenderer)
    } else {
        Box::new(InkscapeRenderer::from_env())
    };
    let merger = PdfUniteMerger::default();
    let merger: Option<&dyn PdfMerger> = config.merge_outputs.then_some(&merger as &dyn PdfMerger);

    let inputs = RunInputs {
        template: args.template.clone(),
        data,
        output_dir: args.out.clone(),
        dry_run: args.dry_run,
    };
    info!(
        "template {} data {} -> {}",
        inputs.template.display(),
        inputs.data.display(),
        inputs.output_dir.display()
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let summary = pipeline::run(&inputs, &config, renderer.as_ref(), merger, cancel)
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))?;

    if let Some(path) = &args.report {
        summary
            .write_json(path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }

    println!(
        "{} file(s) generated, {} skipped, {} of {} row(s) succeeded",
        summary.generated.len(),
        summary.skipped_files.len(),
        summary.rows_succeeded,
        summary.rows_selected
    );

    if let Some(reason) = &summary.aborted {
        anyhow::bail!("run aborted: {}", reason);
    }
    if summary.has_failures() {
        anyhow::bail!("some rows or cells failed; see the log or --report for details");
    }
    Ok(())
}

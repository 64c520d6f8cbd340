//! Run configuration.
//!
//! Every option has a default so an empty TOML file is a valid configuration.
//! `Config::validate` must pass before any row is processed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AutogenError, Result};

pub const DPI_MIN: u32 = 72;
pub const DPI_MAX: u32 = 1200;
pub const DEFAULT_DPI: u32 = 300;
pub const DEFAULT_MAX_ROWS: usize = 10_000;
pub const DEFAULT_FILENAME_PATTERN: &str = "output_{count}";
pub const MAX_FILENAME_PATTERN_LEN: usize = 100;
pub const MAX_COUNT_WIDTH: usize = 12;

pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "tiff", "pdf", "eps", "ps",
];

// ═══════════════════════════════════════════════════════════════════════════════
// EXPORT FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Pdf,
    Svg,
    Jpg,
    Eps,
    Ps,
    Tiff,
    Webp,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 8] = [
        ExportFormat::Png,
        ExportFormat::Pdf,
        ExportFormat::Svg,
        ExportFormat::Jpg,
        ExportFormat::Eps,
        ExportFormat::Ps,
        ExportFormat::Tiff,
        ExportFormat::Webp,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Svg => "svg",
            ExportFormat::Jpg => "jpg",
            ExportFormat::Eps => "eps",
            ExportFormat::Ps => "ps",
            ExportFormat::Tiff => "tiff",
            ExportFormat::Webp => "webp",
        }
    }

    /// Raster formats honour the dpi setting.
    pub fn is_raster(self) -> bool {
        matches!(
            self,
            ExportFormat::Png | ExportFormat::Jpg | ExportFormat::Tiff | ExportFormat::Webp
        )
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = AutogenError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let lower = if lower == "jpeg" { "jpg".to_string() } else { lower };
        ExportFormat::ALL
            .iter()
            .copied()
            .find(|f| f.extension() == lower)
            .ok_or_else(|| {
                AutogenError::configuration(format!(
                    "unsupported export format '{}' (expected one of: {})",
                    s,
                    ExportFormat::ALL
                        .iter()
                        .map(|f| f.extension())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLISION POLICY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    Overwrite,
    Skip,
    AutoNumber,
}

impl FromStr for CollisionPolicy {
    type Err = AutogenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(CollisionPolicy::Overwrite),
            "skip" => Ok(CollisionPolicy::Skip),
            "auto-number" | "autonumber" | "number" => Ok(CollisionPolicy::AutoNumber),
            other => Err(AutogenError::configuration(format!(
                "unknown collision policy '{}'",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Row-range filter expression ("1-5,8", "even", ...). `None` selects all rows.
    pub row_range: Option<String>,
    pub export_format: ExportFormat,
    pub dpi: u32,
    pub filename_pattern: String,
    pub overwrite: bool,
    /// Explicit collision policy; derived from `overwrite` when unset.
    pub collision: Option<CollisionPolicy>,
    pub merge_outputs: bool,
    /// Remove the per-row PDFs once the merged file is written.
    pub delete_individual_pdfs: bool,
    pub extra_image_search_paths: Vec<PathBuf>,
    pub max_rows: usize,
    /// Truncate oversized input (and report it) instead of failing.
    pub truncate_rows: bool,
    /// Reject values that needed sanitizing instead of applying the stripped text.
    pub strict_validation: bool,
    /// Pad short rows / drop surplus empty fields instead of failing.
    pub lenient_rows: bool,
    /// Skip the offending row on a security violation; abort the run otherwise.
    pub skip_on_security: bool,
    pub abort_on_render_failure: bool,
    /// `autodetect` or an encoding label understood by `encoding_rs`.
    pub encoding: String,
    pub count_width: usize,
    pub render_workers: usize,
    pub remove_hidden_layers: bool,
    pub use_relative_image_paths: bool,
    pub allow_remote_images: bool,
    pub allowed_image_extensions: Vec<String>,
    /// Absolute image paths must live under one of these roots. Empty means the
    /// data, template and extra search directories.
    pub image_roots: Vec<PathBuf>,
    pub max_value_length: usize,
    /// Number of offending row indices kept per error kind in the summary.
    pub summary_row_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            row_range: None,
            export_format: ExportFormat::Png,
            dpi: DEFAULT_DPI,
            filename_pattern: DEFAULT_FILENAME_PATTERN.to_string(),
            overwrite: true,
            collision: None,
            merge_outputs: false,
            delete_individual_pdfs: false,
            extra_image_search_paths: Vec::new(),
            max_rows: DEFAULT_MAX_ROWS,
            truncate_rows: false,
            strict_validation: false,
            lenient_rows: false,
            skip_on_security: true,
            abort_on_render_failure: false,
            encoding: "autodetect".to_string(),
            count_width: 0,
            render_workers: 1,
            remove_hidden_layers: false,
            use_relative_image_paths: false,
            allow_remote_images: false,
            allowed_image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            image_roots: Vec::new(),
            max_value_length: 10_000,
            summary_row_limit: 10,
        }
    }
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)
            .map_err(|e| AutogenError::configuration(format!("invalid config: {}", e)))?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| AutogenError::io(path, e))?;
        Self::from_toml_str(&source)
    }

    pub fn collision_policy(&self) -> CollisionPolicy {
        self.collision.unwrap_or(if self.overwrite {
            CollisionPolicy::Overwrite
        } else {
            CollisionPolicy::Skip
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.dpi < DPI_MIN || self.dpi > DPI_MAX {
            return Err(AutogenError::configuration(format!(
                "dpi must be between {} and {}, got {}",
                DPI_MIN, DPI_MAX, self.dpi
            )));
        }

        let pattern = self.filename_pattern.trim();
        if pattern.is_empty() {
            return Err(AutogenError::configuration("filename pattern cannot be empty"));
        }
        if pattern.chars().count() > MAX_FILENAME_PATTERN_LEN {
            return Err(AutogenError::configuration(format!(
                "filename pattern longer than {} characters",
                MAX_FILENAME_PATTERN_LEN
            )));
        }

        if self.max_rows == 0 {
            return Err(AutogenError::configuration("max_rows must be at least 1"));
        }
        if self.render_workers == 0 {
            return Err(AutogenError::configuration("render_workers must be at least 1"));
        }
        if self.count_width > MAX_COUNT_WIDTH {
            return Err(AutogenError::configuration(format!(
                "count_width must be at most {}",
                MAX_COUNT_WIDTH
            )));
        }
        if self.merge_outputs && self.export_format != ExportFormat::Pdf {
            return Err(AutogenError::configuration(
                "merge_outputs requires export_format = \"pdf\"",
            ));
        }
        if self.allowed_image_extensions.is_empty() {
            return Err(AutogenError::configuration(
                "allowed_image_extensions cannot be empty",
            ));
        }
        if !self.encoding.eq_ignore_ascii_case("autodetect")
            && encoding_rs::Encoding::for_label(self.encoding.trim().as_bytes()).is_none()
        {
            return Err(AutogenError::configuration(format!(
                "unknown encoding '{}'",
                self.encoding
            )));
        }
        Ok(())
    }
}

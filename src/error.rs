use std::path::PathBuf;

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_DATA_FORMAT: &str = "E-DATA";
pub const ERR_CONFIGURATION: &str = "E-CONFIG";
pub const ERR_SECURITY: &str = "E-SECURITY";
pub const ERR_VALIDATION: &str = "E-VALIDATION";
pub const ERR_IMAGE_NOT_FOUND: &str = "E-IMAGE";
pub const ERR_RENDER: &str = "E-RENDER";
pub const ERR_IO: &str = "E-IO";

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_DATA_FORMAT => "Malformed input data aborts the run before any output is written.",
        ERR_CONFIGURATION => "Bad configuration fails fast before the first row is processed.",
        ERR_SECURITY => "Unsafe content or paths never reach the template or the filesystem.",
        ERR_VALIDATION => "A cell that fails its grammar is skipped; the row continues.",
        ERR_IMAGE_NOT_FOUND => "An unresolvable image keeps the template's original reference.",
        ERR_RENDER => "A failed render never leaves a partial output file behind.",
        ERR_IO => "Filesystem failures are reported with the path involved.",
        _ => "Unknown error code.",
    }
}

#[derive(Debug, Error)]
pub enum AutogenError {
    #[error("data format error: {0}")]
    DataFormat(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("image not found: '{value}' (searched {searched} location(s))")]
    ImageNotFound { value: String, searched: usize },

    #[error("render error: {0}")]
    Render(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AutogenError {
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::DataFormat(_) => ERR_DATA_FORMAT,
            Self::Configuration(_) => ERR_CONFIGURATION,
            Self::Security(_) => ERR_SECURITY,
            Self::Validation(_) => ERR_VALIDATION,
            Self::ImageNotFound { .. } => ERR_IMAGE_NOT_FOUND,
            Self::Render(_) => ERR_RENDER,
            Self::Io { .. } => ERR_IO,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DataFormat(_) => ErrorKind::DataFormat,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Security(_) => ErrorKind::Security,
            Self::Validation(_) => ErrorKind::Validation,
            Self::ImageNotFound { .. } => ErrorKind::ImageNotFound,
            Self::Render(_) => ErrorKind::Render,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn guarantee(&self) -> &'static str {
        get_guarantee(self.code())
    }
}

/// Error kinds as counted in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    DataFormat,
    Configuration,
    Security,
    Validation,
    ImageNotFound,
    Render,
    Io,
    /// Not an error: a label that addresses no template node.
    ResolutionMiss,
}

pub type Result<T> = std::result::Result<T, AutogenError>;

//! Image Reference Resolver
//!
//! Maps an image cell to a concrete file. Candidates, first existing one wins:
//!
//! 1. the value itself, when absolute
//! 2. relative to the data file's directory
//! 3. relative to the template's directory
//! 4. relative to each extra search path, in configured order
//! 5. the bare file name, searched recursively under the data directory
//!
//! Every candidate passes `sanitize::validate_path` before it is tried.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{AutogenError, Result};
use crate::sanitize;

const RECURSIVE_SEARCH_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Local(PathBuf),
    Remote(String),
}

#[derive(Debug, Clone)]
pub struct SearchContext {
    data_dir: Option<PathBuf>,
    template_dir: Option<PathBuf>,
    extra_paths: Vec<PathBuf>,
    roots: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
    allow_remote: bool,
    relative_to: Option<PathBuf>,
}

impl SearchContext {
    pub fn new(config: &Config, data_dir: Option<&Path>, template_dir: Option<&Path>) -> Self {
        let data_dir = data_dir.map(absolute);
        let template_dir = template_dir.map(absolute);
        let extra_paths: Vec<PathBuf> = config
            .extra_image_search_paths
            .iter()
            .map(|p| absolute(p))
            .collect();

        let roots = if config.image_roots.is_empty() {
            data_dir
                .iter()
                .chain(template_dir.iter())
                .chain(extra_paths.iter())
                .cloned()
                .collect()
        } else {
            config.image_roots.iter().map(|p| absolute(p)).collect()
        };

        Self {
            data_dir,
            template_dir,
            extra_paths,
            roots,
            allowed_extensions: config.allowed_image_extensions.clone(),
            allow_remote: config.allow_remote_images,
            relative_to: None,
        }
    }

    /// Write hrefs relative to `dir` instead of absolute.
    pub fn with_relative_output(mut self, dir: &Path) -> Self {
        self.relative_to = Some(absolute(dir));
        self
    }

    fn candidates(&self, value: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if value.is_absolute() {
            out.push(value.to_path_buf());
            return out;
        }
        out.extend(self.data_dir.iter().map(|d| d.join(value)));
        out.extend(self.template_dir.iter().map(|d| d.join(value)));
        out.extend(self.extra_paths.iter().map(|d| d.join(value)));
        out
    }

    fn accepts(&self, candidate: &Path) -> bool {
        let roots: Vec<&Path> = self.roots.iter().map(PathBuf::as_path).collect();
        sanitize::validate_path(candidate, &roots, &self.allowed_extensions)
    }
}

/// Resolve one image cell value.
pub fn resolve(value: &str, ctx: &SearchContext) -> Result<ImageRef> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("http://") || lower.starts_with("https://") {
        if ctx.allow_remote {
            return Ok(ImageRef::Remote(trimmed.to_string()));
        }
        warn!("remote image '{}' rejected; remote images are disabled", trimmed);
        return Err(AutogenError::ImageNotFound {
            value: trimmed.to_string(),
            searched: 0,
        });
    }

    let local = if lower.starts_with("file://") {
        &trimmed["file://".len()..]
    } else {
        trimmed
    };
    let value_path = Path::new(local);

    let mut searched = 0usize;
    for candidate in ctx.candidates(value_path) {
        searched += 1;
        if !ctx.accepts(&candidate) {
            debug!("image candidate {} rejected by path validation", candidate.display());
            continue;
        }
        if candidate.is_file() {
            debug!("image '{}' resolved to {}", trimmed, candidate.display());
            return Ok(ImageRef::Local(candidate));
        }
    }

    if let (Some(dir), Some(name)) = (&ctx.data_dir, value_path.file_name()) {
        let found = WalkDir::new(dir)
            .max_depth(RECURSIVE_SEARCH_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == name)
            .map(|entry| entry.into_path())
            .find(|path| ctx.accepts(path));
        if let Some(path) = found {
            debug!("image '{}' found by recursive search at {}", trimmed, path.display());
            return Ok(ImageRef::Local(path));
        }
        searched += 1;
    }

    Err(AutogenError::ImageNotFound {
        value: trimmed.to_string(),
        searched,
    })
}

/// Text to write into the image node's href.
pub fn href_for(image: &ImageRef, ctx: &SearchContext) -> String {
    match image {
        ImageRef::Remote(url) => url.clone(),
        ImageRef::Local(path) => {
            let shown = match &ctx.relative_to {
                Some(base) => relative_path(path, base),
                None => path.clone(),
            };
            shown.to_string_lossy().replace('\\', "/")
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// `path` expressed relative to `base`; both are expected absolute.
fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return path.to_path_buf();
    }

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part.as_os_str());
    }
    out
}

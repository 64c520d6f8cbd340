//! Render collaborators.
//!
//! Turning a mutated tree into PNG/PDF/... is an external capability. The
//! pipeline only sees the `Renderer` and `PdfMerger` traits. Built in are an SVG
//! serializer, an adapter for the Inkscape command line and one for `pdfunite`.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use crate::config::ExportFormat;
use crate::error::{AutogenError, Result};
use crate::template::{Document, ElementNode, TemplateNode};

pub trait Renderer: Send + Sync {
    fn supports(&self, format: ExportFormat) -> bool;

    fn render(&self, document: &Document, format: ExportFormat, dpi: u32) -> Result<Vec<u8>>;
}

pub trait PdfMerger: Send + Sync {
    fn merge(&self, pdfs: &[Vec<u8>]) -> Result<Vec<u8>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SVG SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

const KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("xlink", "http://www.w3.org/1999/xlink"),
    (
        "sodipodi",
        "http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd",
    ),
    ("inkscape", "http://www.inkscape.org/namespaces/inkscape"),
];

/// Serialize a document as standalone SVG.
pub fn serialize(document: &Document) -> String {
    let mut root = document.root.clone();
    declare_namespaces(&mut root);

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n");
    write_element(&root, &mut out);
    out.push('\n');
    out
}

/// Make sure every prefix in use is declared on the root, or XML readers reject
/// the file.
fn declare_namespaces(root: &mut ElementNode) {
    if !root.has_attr("xmlns") {
        root.set_attr("xmlns", "http://www.w3.org/2000/svg");
    }
    let missing: Vec<(String, &str)> = {
        let mut used = Vec::new();
        collect_prefixes(root, &mut used);
        KNOWN_NAMESPACES
            .iter()
            .map(|(prefix, uri)| (prefix, format!("xmlns:{}", prefix), *uri))
            .filter(|(prefix, decl, _)| used.contains(*prefix) && !root.has_attr(decl))
            .map(|(_, decl, uri)| (decl, uri))
            .collect()
    };
    for (decl, uri) in missing {
        root.set_attr(&decl, uri);
    }
}

fn collect_prefixes<'a>(el: &'a ElementNode, used: &mut Vec<&'a str>) {
    let names = std::iter::once(el.tag.as_str()).chain(el.attributes.iter().map(|a| a.name.as_str()));
    for name in names {
        if let Some((prefix, _)) = name.split_once(':') {
            if prefix != "xmlns" && prefix != "xml" && !used.contains(&prefix) {
                used.push(prefix);
            }
        }
    }
    for child in &el.children {
        if let TemplateNode::Element(child) = child {
            collect_prefixes(child, used);
        }
    }
}

fn write_element(el: &ElementNode, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for attr in &el.attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&escape_markup(&attr.value));
        out.push('"');
    }

    if el.children.is_empty() {
        out.push_str(" />");
        return;
    }

    out.push('>');
    for child in &el.children {
        match child {
            TemplateNode::Element(child) => write_element(child, out),
            TemplateNode::Text(text) => out.push_str(&escape_text(&text.value)),
        }
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
        .replace('\'', "&#39;")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Emits the mutated SVG itself. Supports only `svg`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SvgRenderer;

impl Renderer for SvgRenderer {
    fn supports(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Svg
    }

    fn render(&self, document: &Document, format: ExportFormat, _dpi: u32) -> Result<Vec<u8>> {
        if format != ExportFormat::Svg {
            return Err(AutogenError::render(format!(
                "the SVG renderer cannot produce {}",
                format
            )));
        }
        Ok(serialize(document).into_bytes())
    }
}

/// Exports through the Inkscape command line (1.x option syntax).
#[derive(Debug, Clone)]
pub struct InkscapeRenderer {
    program: PathBuf,
}

impl InkscapeRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Program from `INKSCAPE`, else `inkscape` on the PATH.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("INKSCAPE").unwrap_or_else(|| OsString::from("inkscape")))
    }
}

impl Renderer for InkscapeRenderer {
    fn supports(&self, _format: ExportFormat) -> bool {
        true
    }

    fn render(&self, document: &Document, format: ExportFormat, dpi: u32) -> Result<Vec<u8>> {
        if format == ExportFormat::Svg {
            return SvgRenderer.render(document, format, dpi);
        }

        let workdir = tempfile::tempdir()
            .map_err(|e| AutogenError::render(format!("cannot create temp dir: {}", e)))?;
        let input = workdir.path().join("input.svg");
        let output = workdir.path().join(format!("output.{}", format.extension()));
        fs::write(&input, serialize(document)).map_err(|e| AutogenError::io(&input, e))?;

        let mut command = Command::new(&self.program);
        command
            .arg(&input)
            .arg(format!("--export-type={}", format.extension()))
            .arg(format!("--export-filename={}", output.display()));
        if format.is_raster() {
            command.arg(format!("--export-dpi={}", dpi));
        }
        debug!("running {:?}", command);

        let result = command.output().map_err(|e| {
            AutogenError::render(format!("cannot run {}: {}", self.program.display(), e))
        })?;
        if !result.status.success() {
            return Err(AutogenError::render(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        fs::read(&output).map_err(|e| {
            AutogenError::render(format!("renderer produced no {} output: {}", format, e))
        })
    }
}

/// Merges PDFs with poppler's `pdfunite`.
#[derive(Debug, Clone)]
pub struct PdfUniteMerger {
    program: PathBuf,
}

impl Default for PdfUniteMerger {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdfunite"),
        }
    }
}

impl PdfMerger for PdfUniteMerger {
    fn merge(&self, pdfs: &[Vec<u8>]) -> Result<Vec<u8>> {
        if pdfs.is_empty() {
            return Err(AutogenError::render("nothing to merge"));
        }
        let workdir = tempfile::tempdir()
            .map_err(|e| AutogenError::render(format!("cannot create temp dir: {}", e)))?;

        let mut inputs = Vec::with_capacity(pdfs.len());
        for (i, pdf) in pdfs.iter().enumerate() {
            let path = workdir.path().join(format!("part_{:05}.pdf", i));
            fs::write(&path, pdf).map_err(|e| AutogenError::io(&path, e))?;
            inputs.push(path);
        }
        let output = workdir.path().join("merged.pdf");

        let result = Command::new(&self.program)
            .args(&inputs)
            .arg(&output)
            .output()
            .map_err(|e| {
                AutogenError::render(format!("cannot run {}: {}", self.program.display(), e))
            })?;
        if !result.status.success() {
            return Err(AutogenError::render(format!(
                "{} failed: {}",
                self.program.display(),
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        fs::read(&output).map_err(|e| AutogenError::io(&output, e))
    }
}

//! Starter data file from a template.
//!
//! Scans the template for addressable nodes and writes a one-row CSV whose
//! headers are ready-made column names and whose values are the template's
//! current values:
//! - text nodes: `label` with the current text
//! - image nodes: `label` with the file name of the current href
//! - layers: `label` with `visible` or `invisible`
//! - shapes: `label##property` for each common paint property that is set
//!
//! A node is named by its label, falling back to its id. The first node in
//! document order wins when two nodes share a name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::classify::PROPERTY_SEPARATOR;
use crate::error::{AutogenError, Result};
use crate::index::normalize_label;
use crate::template::{Document, ElementNode, NodeKind};
use crate::visitor::{walk_element, TemplateVisitor};

pub const STARTER_FILE_NAME: &str = "template_data.csv";

/// Shape properties worth a starter column when the template sets them.
const EXPORTED_PROPERTIES: &[&str] = &["fill", "stroke", "stroke-width", "opacity"];

/// Column name to template value, sorted by column name.
pub fn starter_columns(document: &Document) -> BTreeMap<String, String> {
    let mut scanner = StarterScanner {
        columns: BTreeMap::new(),
    };
    scanner.visit_element(&document.root);
    scanner.columns
}

/// Write the starter CSV into `dir` and return its path.
pub fn write_starter_csv(document: &Document, dir: &Path) -> Result<PathBuf> {
    let columns = starter_columns(document);
    if columns.is_empty() {
        return Err(AutogenError::configuration(
            "template has no labeled text, image, layer or shape nodes",
        ));
    }

    let mut wtr = csv::Writer::from_writer(Vec::new());
    let written = wtr
        .write_record(columns.keys())
        .and_then(|_| wtr.write_record(columns.values()));
    written.map_err(|e| AutogenError::data_format(format!("cannot write starter CSV: {}", e)))?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| AutogenError::data_format(format!("cannot write starter CSV: {}", e)))?;

    fs::create_dir_all(dir).map_err(|e| AutogenError::io(dir, e))?;
    let path = dir.join(STARTER_FILE_NAME);
    fs::write(&path, bytes).map_err(|e| AutogenError::io(&path, e))?;

    info!("exported {} column(s) to {}", columns.len(), path.display());
    debug!("columns: {}", columns.keys().cloned().collect::<Vec<_>>().join(", "));
    Ok(path)
}

struct StarterScanner {
    columns: BTreeMap<String, String>,
}

impl StarterScanner {
    fn add(&mut self, column: String, value: String) {
        self.columns.entry(column).or_insert(value);
    }
}

impl<'a> TemplateVisitor<'a> for StarterScanner {
    fn visit_element(&mut self, element: &'a ElementNode) {
        let name = element
            .label()
            .or_else(|| element.identity())
            .map(normalize_label)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let Some(name) = name else {
            walk_element(self, element);
            return;
        };

        match element.kind {
            // tspans and flowParas belong to their text node's column
            NodeKind::Text => {
                self.add(name, element.text_content().trim().to_string());
                return;
            }
            NodeKind::Image => {
                let href = element
                    .attr("xlink:href")
                    .or_else(|| element.attr("href"))
                    .unwrap_or("");
                let file_name = href.rsplit(['/', '\\']).next().unwrap_or(href);
                self.add(name, file_name.to_string());
            }
            NodeKind::Container if element.is_layer() => {
                let shown = if element.is_hidden() { "invisible" } else { "visible" };
                self.add(name, shown.to_string());
            }
            NodeKind::Container => {}
            NodeKind::Shape => {
                for property in EXPORTED_PROPERTIES {
                    let value = element
                        .attr(property)
                        .map(str::to_string)
                        .or_else(|| element.style_value(property));
                    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                        self.add(format!("{}{}{}", name, PROPERTY_SEPARATOR, property), value);
                    }
                }
            }
        }
        walk_element(self, element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RunCache;
    use crate::loader::{self, LoadOptions};
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = r##"<svg viewBox="0 0 100 100">
<g id="layer1" inkscape:label="show_logo" inkscape:groupmode="layer">
  <image id="logo" xlink:href="assets/img/logo.png"/>
</g>
<g id="hidden" inkscape:groupmode="layer" style="display:none"/>
<text id="title" inkscape:label="&lt;name&gt;"><tspan id="tspan1">Jane Doe</tspan></text>
<rect id="frame" stroke="#000000" style="fill:none;stroke-width:2"/>
<circle r="2"/>
</svg>"##;

    #[test]
    fn test_starter_columns() {
        let doc = Document::parse(TEMPLATE).unwrap();
        let columns: Vec<(String, String)> = starter_columns(&doc).into_iter().collect();
        let expected: Vec<(String, String)> = [
            ("frame##fill", "none"),
            ("frame##stroke", "#000000"),
            ("frame##stroke-width", "2"),
            ("hidden", "invisible"),
            ("logo", "logo.png"),
            ("name", "Jane Doe"),
            ("show_logo", "visible"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(columns, expected);
    }

    #[test]
    fn test_starter_csv_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::parse(TEMPLATE).unwrap();
        let path = write_starter_csv(&doc, dir.path()).unwrap();
        assert_eq!(path, dir.path().join(STARTER_FILE_NAME));

        let mut cache = RunCache::new();
        let dataset = loader::load(&path, LoadOptions::default(), &mut cache).unwrap();
        assert_eq!(dataset.headers.len(), 7);
        assert_eq!(dataset.rows.len(), 1);
        assert_eq!(dataset.rows[0].get("name"), Some("Jane Doe"));
    }

    #[test]
    fn test_unlabeled_template_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::parse(r#"<svg><rect/></svg>"#).unwrap();
        let err = write_starter_csv(&doc, dir.path()).unwrap_err();
        assert!(matches!(err, AutogenError::Configuration(_)));
        assert!(!dir.path().join(STARTER_FILE_NAME).exists());
    }
}

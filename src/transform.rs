//! Row Transformer
//!
//! Applies one row to one deep copy of the canonical template. Per row:
//!
//! 1. sanitize every value (a strict-mode violation skips the whole row)
//! 2. deep-copy the template; the label index is path based and addresses the copy
//! 3. element keys: dispatch on node kind (text, image, container alias)
//! 4. property keys: write the property verbatim; link attributes (`href`,
//!    `xlink:href`) go through the image search like an image cell
//! 5. visibility keys: tolerant boolean grammar
//!
//! Each cell ends as `Ok(Applied)` or `Err(Skipped)`; nothing inside a row
//! raises past the row except a security violation in strict mode.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::classify::Classification;
use crate::error::{AutogenError, ErrorKind, Result};
use crate::image::{self, ImageRef, SearchContext};
use crate::index::{node_at_mut, LabelIndex};
use crate::loader::RowRecord;
use crate::sanitize;
use crate::template::{Document, ElementNode, NodeKind, TemplateNode, TextNode};

// ═══════════════════════════════════════════════════════════════════════════════
// INSTRUCTIONS AND OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InstructionKind {
    ReplaceValue,
    SetProperty { property: String },
    SetVisibility,
}

/// One resolved `(label, kind, payload)` triple, built and consumed per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub column: &'a str,
    pub label: &'a str,
    pub kind: InstructionKind,
    pub payload: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum Skipped {
    /// Empty cell; the node keeps its template value.
    Empty,
    /// The label addresses no node.
    Unresolved,
    Rejected { kind: ErrorKind, message: String },
}

impl Skipped {
    fn rejected(err: &AutogenError) -> Self {
        Skipped::Rejected {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellOutcome {
    pub column: String,
    pub instruction: InstructionKind,
    pub result: std::result::Result<Applied, Skipped>,
}

#[derive(Debug, Clone)]
pub struct TransformedRow {
    pub document: Document,
    pub cells: Vec<CellOutcome>,
    /// Columns whose values had unsafe content stripped.
    pub stripped: Vec<String>,
}

impl TransformedRow {
    /// Cells rejected for a reason worth reporting (not empty, not unresolved).
    pub fn rejections(&self) -> impl Iterator<Item = (&str, ErrorKind, &str)> {
        self.cells.iter().filter_map(|cell| match &cell.result {
            Err(Skipped::Rejected { kind, message }) => {
                Some((cell.column.as_str(), *kind, message.as_str()))
            }
            _ => None,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE GRAMMARS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tolerant visibility grammar, case-insensitive.
pub fn parse_visibility(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "visible" | "show" | "inline" | "display" => Ok(true),
        "false" | "0" | "no" | "off" | "hidden" | "hide" | "invisible" | "none" => Ok(false),
        _ => Err(AutogenError::validation(format!(
            "'{}' is not a visibility value (expected true/false, yes/no, on/off, 1/0)",
            value
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE MUTATIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn set_visibility(node: &mut ElementNode, visible: bool) {
    let display = if visible { "inline" } else { "none" };
    node.set_style_value("display", display);
    if node.has_attr("display") {
        node.set_attr("display", display);
    }
}

/// Replace the text of a text-bearing node wholesale.
///
/// If the content lives in child `tspan`/`flowPara` elements, the first one is
/// kept (with its positioning) and receives the value; the other text children
/// are blanked. Non-text children such as a `flowRegion` are left alone.
///
/// Dropped children become empty text nodes rather than being removed, so
/// every sibling keeps its child index and the label index still addresses it.
pub fn replace_text(node: &mut ElementNode, value: &str) {
    let first_text_child = node
        .children
        .iter()
        .position(|c| matches!(c, TemplateNode::Element(el) if el.kind == NodeKind::Text));

    match first_text_child {
        Some(keep) => {
            for (index, child) in node.children.iter_mut().enumerate() {
                let dropped = match child {
                    TemplateNode::Text(_) => true,
                    TemplateNode::Element(el) => el.kind == NodeKind::Text && index != keep,
                };
                if dropped {
                    *child = blank();
                }
            }
            if let Some(child) = node.children[keep].as_element_mut() {
                replace_text(child, value);
            }
        }
        None => {
            let mut target = None;
            for (index, child) in node.children.iter_mut().enumerate() {
                if let TemplateNode::Text(text) = child {
                    text.value.clear();
                    target.get_or_insert(index);
                }
            }
            match target.and_then(|index| node.children.get_mut(index)) {
                Some(TemplateNode::Text(text)) => text.value = value.to_string(),
                _ => node.children.push(TemplateNode::Text(TextNode {
                    value: value.to_string(),
                })),
            }
        }
    }
}

fn blank() -> TemplateNode {
    TemplateNode::Text(TextNode {
        value: String::new(),
    })
}

/// Write `property` verbatim as an attribute, and into `style` too when the
/// style already declares it.
pub fn set_property(node: &mut ElementNode, property: &str, value: &str) -> Result<()> {
    if sanitize::is_event_handler(property) {
        return Err(AutogenError::security(format!(
            "property '{}' is an event handler",
            property
        )));
    }
    if node.has_style_value(property) {
        if sanitize::breaks_style_declaration(value) {
            return Err(AutogenError::security(format!(
                "value for style property '{}' contains ';', '{{' or '}}'",
                property
            )));
        }
        node.set_style_value(property, value);
    }
    node.set_attr(property, value);
    Ok(())
}

pub fn set_image_href(node: &mut ElementNode, href: &str) {
    let mut written = false;
    for name in ["xlink:href", "href"] {
        if node.has_attr(name) {
            node.set_attr(name, href);
            written = true;
        }
    }
    if !written {
        node.set_attr("xlink:href", href);
    }
    node.remove_attr("sodipodi:absref");
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORMER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    pub strict_validation: bool,
    pub max_value_length: usize,
    pub remove_hidden_layers: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            strict_validation: false,
            max_value_length: 10_000,
            remove_hidden_layers: false,
        }
    }
}

pub struct Transformer<'t> {
    template: &'t Document,
    index: &'t LabelIndex,
    classification: &'t Classification,
    images: &'t SearchContext,
    options: TransformOptions,
}

impl<'t> Transformer<'t> {
    pub fn new(
        template: &'t Document,
        index: &'t LabelIndex,
        classification: &'t Classification,
        images: &'t SearchContext,
        options: TransformOptions,
    ) -> Self {
        Self {
            template,
            index,
            classification,
            images,
            options,
        }
    }

    /// Produce the mutated copy for one row. `row_number` is only used in logs.
    pub fn transform(&self, row_number: usize, row: &RowRecord) -> Result<TransformedRow> {
        let mut values: HashMap<&str, String> = HashMap::with_capacity(row.len());
        let mut stripped = Vec::new();
        for (column, raw) in row.iter() {
            let clean = sanitize::sanitize_value(
                column,
                raw,
                self.options.max_value_length,
                self.options.strict_validation,
            )?;
            if clean.stripped {
                stripped.push(column.to_string());
            }
            values.insert(column, clean.text);
        }

        let mut document = self.template.deep_copy();
        let instructions = self.instructions(&values);
        let mut cells = Vec::with_capacity(instructions.len());

        for instruction in &instructions {
            let result = if instruction.payload.is_empty() && !had_raw_value(instruction, row)
            {
                Err(Skipped::Empty)
            } else {
                apply_instruction(&mut document, self.index, self.images, instruction)
            };

            if let Err(Skipped::Rejected { message, .. }) = &result {
                warn!("row {}: column '{}' skipped: {}", row_number, instruction.column, message);
            }
            cells.push(CellOutcome {
                column: instruction.column.to_string(),
                instruction: instruction.kind.clone(),
                result,
            });
        }

        if self.options.remove_hidden_layers {
            let removed = document.remove_hidden_containers();
            if removed > 0 {
                debug!("row {}: removed {} hidden container(s)", row_number, removed);
            }
        }

        Ok(TransformedRow {
            document,
            cells,
            stripped,
        })
    }

    /// Element keys, then property keys, then visibility keys, each in sorted
    /// column order.
    fn instructions<'v>(&'v self, values: &'v HashMap<&str, String>) -> Vec<Instruction<'v>> {
        let payload = |column: &str| values.get(column).map(String::as_str).unwrap_or("");
        let mut out = Vec::new();

        for column in &self.classification.element_keys {
            out.push(Instruction {
                column,
                label: column,
                kind: InstructionKind::ReplaceValue,
                payload: payload(column),
            });
        }
        for (column, key) in &self.classification.property_keys {
            out.push(Instruction {
                column,
                label: &key.label,
                kind: InstructionKind::SetProperty {
                    property: key.property.clone(),
                },
                payload: payload(column),
            });
        }
        for column in &self.classification.visibility_keys {
            out.push(Instruction {
                column,
                label: column,
                kind: InstructionKind::SetVisibility,
                payload: payload(column),
            });
        }
        out
    }
}

/// A non-empty value that sanitized down to nothing is still applied.
fn had_raw_value(instruction: &Instruction<'_>, row: &RowRecord) -> bool {
    row.get(instruction.column)
        .map(|raw| !raw.is_empty())
        .unwrap_or(false)
}

fn apply_instruction(
    document: &mut Document,
    index: &LabelIndex,
    images: &SearchContext,
    instruction: &Instruction<'_>,
) -> std::result::Result<Applied, Skipped> {
    let paths = index.find(instruction.label);
    if paths.is_empty() {
        return Err(Skipped::Unresolved);
    }

    let payload = instruction.payload;

    // Resolve per cell, not per node: all matches get the same href.
    let mut image_href: Option<std::result::Result<String, AutogenError>> = None;
    let mut applied = 0usize;
    let mut first_error: Option<AutogenError> = None;

    for path in paths {
        let Some(node) = node_at_mut(&mut document.root, path) else {
            continue;
        };

        let outcome = match &instruction.kind {
            InstructionKind::ReplaceValue => match node.kind {
                NodeKind::Text => {
                    replace_text(node, payload);
                    Ok(())
                }
                NodeKind::Image => {
                    let href = image_href.get_or_insert_with(|| {
                        image::resolve(payload, images)
                            .map(|found: ImageRef| image::href_for(&found, images))
                    });
                    match href {
                        Ok(href) => {
                            set_image_href(node, href);
                            Ok(())
                        }
                        Err(err) => Err(clone_error(err)),
                    }
                }
                NodeKind::Container => {
                    parse_visibility(payload).map(|visible| set_visibility(node, visible))
                }
                NodeKind::Shape => Err(AutogenError::validation(format!(
                    "<{}> cannot take a value; use a '{}##property' column",
                    node.tag, instruction.label
                ))),
            },
            InstructionKind::SetProperty { property } if sanitize::is_link_attribute(property) => {
                if payload.trim().starts_with('#') {
                    node.set_attr(property, payload.trim());
                    Ok(())
                } else {
                    let href = image_href.get_or_insert_with(|| {
                        image::resolve(payload, images)
                            .map(|found: ImageRef| image::href_for(&found, images))
                    });
                    match href {
                        Ok(href) => {
                            node.set_attr(property, href);
                            node.remove_attr("sodipodi:absref");
                            Ok(())
                        }
                        Err(err) => Err(clone_error(err)),
                    }
                }
            }
            InstructionKind::SetProperty { property } => set_property(node, property, payload),
            InstructionKind::SetVisibility => {
                parse_visibility(payload).map(|visible| set_visibility(node, visible))
            }
        };

        match outcome {
            Ok(()) => applied += 1,
            Err(err) => {
                debug!("label '{}': {}", instruction.label, err);
                first_error.get_or_insert(err);
            }
        }
    }

    match (applied, first_error) {
        (0, Some(err)) => Err(Skipped::rejected(&err)),
        (0, None) => Err(Skipped::Unresolved),
        (nodes, _) => Ok(Applied { nodes }),
    }
}

fn clone_error(err: &AutogenError) -> AutogenError {
    match err {
        AutogenError::ImageNotFound { value, searched } => AutogenError::ImageNotFound {
            value: value.clone(),
            searched: *searched,
        },
        other => AutogenError::validation(other.to_string()),
    }
}

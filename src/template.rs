//! Template Module
//!
//! Parses an SVG template into an owned node tree. The canonical `Document` is
//! never mutated once parsed; every row works on its own `deep_copy`.
//!
//! Markup goes through html5ever as foreign content, so Inkscape documents with
//! namespaced attributes (`inkscape:label`, `sodipodi:*`) parse without a
//! namespace-aware XML stack.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::cache::RunCache;
use crate::error::{AutogenError, Result};
use crate::sanitize;
use crate::visitor::{walk_element, walk_element_mut, TemplateVisitor, TemplateVisitorMut};

pub const LABEL_ATTR: &str = "inkscape:label";
pub const IDENTITY_ATTR: &str = "id";
pub const GROUPMODE_ATTR: &str = "inkscape:groupmode";

// ═══════════════════════════════════════════════════════════════════════════════
// SVG NAME CASE MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// html5ever restores casing for the SVG 1.1 vocabulary. Inkscape's flowed
    /// text elements are not part of it and come out lowercased.
    static ref SVG_TAG_CASE_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("flowroot", "flowRoot");
        m.insert("flowpara", "flowPara");
        m.insert("flowspan", "flowSpan");
        m.insert("flowregion", "flowRegion");
        m.insert("flowdiv", "flowDiv");
        m.insert("lineargradient", "linearGradient");
        m.insert("radialgradient", "radialGradient");
        m.insert("clippath", "clipPath");
        m.insert("textpath", "textPath");
        m.insert("foreignobject", "foreignObject");
        m
    };

    static ref SVG_ATTR_CASE_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("viewbox", "viewBox");
        m.insert("preserveaspectratio", "preserveAspectRatio");
        m.insert("gradienttransform", "gradientTransform");
        m.insert("gradientunits", "gradientUnits");
        m.insert("patternunits", "patternUnits");
        m.insert("patterntransform", "patternTransform");
        m.insert("clippathunits", "clipPathUnits");
        m.insert("maskunits", "maskUnits");
        m.insert("markerwidth", "markerWidth");
        m.insert("markerheight", "markerHeight");
        m.insert("refx", "refX");
        m.insert("refy", "refY");
        m.insert("textlength", "textLength");
        m.insert("lengthadjust", "lengthAdjust");
        m.insert("startoffset", "startOffset");
        m.insert("stddeviation", "stdDeviation");
        m.insert("filterunits", "filterUnits");
        m
    };

    static ref SCRIPT_BLOCK_RE: Regex =
        Regex::new(r"(?is)<script\b[^>]*>[\s\S]*?</script\s*>").unwrap();

    static ref STYLE_DECL_RE: Regex = Regex::new(r"\s*([^:;]+?)\s*:\s*([^;]*?)\s*(?:;|$)").unwrap();
}

fn correct_svg_tag_name(tag: &str) -> String {
    let lower = tag.to_ascii_lowercase();
    match SVG_TAG_CASE_MAP.get(lower.as_str()) {
        Some(&corrected) => corrected.to_string(),
        None => tag.to_string(),
    }
}

fn correct_svg_attribute_name(attr_name: &str) -> String {
    let lower = attr_name.to_ascii_lowercase();
    match SVG_ATTR_CASE_MAP.get(lower.as_str()) {
        Some(&corrected) => corrected.to_string(),
        None => attr_name.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE TREE
// ═══════════════════════════════════════════════════════════════════════════════

/// What a node can do with an element value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Text,
    Image,
    Container,
    Shape,
}

impl NodeKind {
    pub fn for_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "text" | "tspan" | "textpath" | "flowroot" | "flowpara" | "flowspan" | "flowdiv" => {
                NodeKind::Text
            }
            "image" => NodeKind::Image,
            "g" | "svg" | "symbol" | "a" | "switch" => NodeKind::Container,
            _ => NodeKind::Shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextNode {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    pub kind: NodeKind,
    pub attributes: Vec<Attribute>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
}

impl TemplateNode {
    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            TemplateNode::Element(el) => Some(el),
            TemplateNode::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
        match self {
            TemplateNode::Element(el) => Some(el),
            TemplateNode::Text(_) => None,
        }
    }
}

impl ElementNode {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            kind: NodeKind::for_tag(tag),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    /// Replace the value in place, or append the attribute.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value.to_string(),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(pos).value)
    }

    pub fn label(&self) -> Option<&str> {
        self.attr(LABEL_ATTR)
    }

    pub fn identity(&self) -> Option<&str> {
        self.attr(IDENTITY_ATTR)
    }

    pub fn is_layer(&self) -> bool {
        self.kind == NodeKind::Container && self.attr(GROUPMODE_ATTR) == Some("layer")
    }

    pub fn style_value(&self, property: &str) -> Option<String> {
        parse_style(self.attr("style")?)
            .into_iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    pub fn has_style_value(&self, property: &str) -> bool {
        self.style_value(property).is_some()
    }

    /// Set one declaration of the `style` attribute, keeping the others in order.
    pub fn set_style_value(&mut self, property: &str, value: &str) {
        let mut decls = self.attr("style").map(parse_style).unwrap_or_default();
        match decls.iter_mut().find(|(name, _)| name == property) {
            Some(decl) => decl.1 = value.to_string(),
            None => decls.push((property.to_string(), value.to_string())),
        }
        self.set_attr("style", &format_style(&decls));
    }

    /// Effective `display` of this node, style declaration first.
    pub fn is_hidden(&self) -> bool {
        let display = self
            .style_value("display")
            .or_else(|| self.attr("display").map(str::to_string));
        matches!(display.as_deref().map(str::trim), Some("none"))
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(el: &ElementNode, out: &mut String) {
    for child in &el.children {
        match child {
            TemplateNode::Text(t) => out.push_str(&t.value),
            TemplateNode::Element(e) => collect_text(e, out),
        }
    }
}

/// Split a `style` attribute into ordered `(property, value)` declarations.
pub fn parse_style(style: &str) -> Vec<(String, String)> {
    STYLE_DECL_RE
        .captures_iter(style)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), caps.get(2)?.as_str().to_string()))
        })
        .collect()
}

pub fn format_style(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect::<Vec<_>>()
        .join(";")
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: ElementNode,
    #[serde(skip)]
    pub source: Option<PathBuf>,
    pub fingerprint: String,
}

impl Document {
    /// Parse template markup. Scripts, event handlers and script-scheme links
    /// are removed on the way in.
    pub fn parse(markup: &str) -> Result<Self> {
        let stripped = SCRIPT_BLOCK_RE.replace_all(markup, "");

        let dom = parse_document(RcDom::default(), Default::default())
            .from_utf8()
            .read_from(&mut stripped.as_bytes())
            .map_err(|e| AutogenError::data_format(format!("cannot parse template: {}", e)))?;

        let svg = find_svg_root(&dom.document)
            .ok_or_else(|| AutogenError::data_format("template has no <svg> root element"))?;

        let mut removed = 0usize;
        let root = match convert_node(&svg, &mut removed) {
            Some(TemplateNode::Element(el)) => el,
            _ => return Err(AutogenError::data_format("template has no <svg> root element")),
        };
        if removed > 0 {
            warn!("template: removed {} unsafe attribute(s) or element(s)", removed);
        }

        Ok(Document {
            root,
            source: None,
            fingerprint: RunCache::compute_hash(markup.as_bytes()),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| AutogenError::io(path, e))?;
        Self::from_bytes(bytes, path)
    }

    /// Parse template bytes read from `path`. The markup must be UTF-8.
    pub fn from_bytes(bytes: Vec<u8>, path: &Path) -> Result<Self> {
        let markup = String::from_utf8(bytes).map_err(|_| {
            AutogenError::data_format(format!("template {} is not valid UTF-8", path.display()))
        })?;
        let mut document = Self::parse(&markup)?;
        document.source = Some(path.to_path_buf());
        debug!("parsed template {}", path.display());
        Ok(document)
    }

    /// Explicit deep copy; the copy shares no node with `self`.
    pub fn deep_copy(&self) -> Document {
        self.clone()
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }

    /// Structural warnings. None of these stop a run.
    pub fn check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let root = &self.root;
        let sized = root.has_attr("width") && root.has_attr("height");
        if !sized && !root.has_attr("viewBox") {
            warnings.push("svg root has neither width/height nor a viewBox".to_string());
        }

        let mut ids = IdCollector::default();
        ids.visit_element(root);
        for id in ids.duplicates {
            warnings.push(format!("duplicate id '{}'", id));
        }
        warnings
    }

    /// Drop container nodes whose effective display is `none`.
    pub fn remove_hidden_containers(&mut self) -> usize {
        let mut pruner = HiddenPruner { removed: 0 };
        pruner.visit_element_mut(&mut self.root);
        pruner.removed
    }
}

#[derive(Default)]
struct IdCollector<'a> {
    seen: HashSet<&'a str>,
    duplicates: Vec<&'a str>,
}

impl<'a> TemplateVisitor<'a> for IdCollector<'a> {
    fn visit_element(&mut self, element: &'a ElementNode) {
        if let Some(id) = element.identity() {
            if !self.seen.insert(id) && !self.duplicates.contains(&id) {
                self.duplicates.push(id);
            }
        }
        walk_element(self, element);
    }
}

struct HiddenPruner {
    removed: usize,
}

impl TemplateVisitorMut for HiddenPruner {
    fn visit_element_mut(&mut self, element: &mut ElementNode) {
        let before = element.children.len();
        element.children.retain(|child| match child {
            TemplateNode::Element(el) => !(el.kind == NodeKind::Container && el.is_hidden()),
            TemplateNode::Text(_) => true,
        });
        self.removed += before - element.children.len();
        walk_element_mut(self, element);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOM CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

fn find_svg_root(handle: &Handle) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &handle.data {
        if (&*name.local).eq_ignore_ascii_case("svg") {
            return Some(handle.clone());
        }
    }
    let children = handle.children.borrow();
    let found = children.iter().find_map(find_svg_root);
    found
}

fn convert_node(handle: &Handle, removed: &mut usize) -> Option<TemplateNode> {
    match &handle.data {
        NodeData::Text { contents } => Some(TemplateNode::Text(TextNode {
            value: contents.borrow().to_string(),
        })),

        NodeData::Element { name, attrs, .. } => {
            let tag = correct_svg_tag_name(&name.local);
            if tag.eq_ignore_ascii_case("script") {
                *removed += 1;
                return None;
            }

            let mut attributes = Vec::new();
            for attr in attrs.borrow().iter() {
                let local = correct_svg_attribute_name(&attr.name.local);
                let attr_name = match &attr.name.prefix {
                    Some(prefix) => format!("{}:{}", prefix, local),
                    None => local,
                };
                let value = attr.value.to_string();

                if sanitize::is_event_handler(&attr_name) {
                    *removed += 1;
                    continue;
                }
                let is_link = attr_name == "href" || attr_name.ends_with(":href");
                if is_link && sanitize::has_unsafe_scheme(&value) {
                    *removed += 1;
                    continue;
                }
                attributes.push(Attribute {
                    name: attr_name,
                    value,
                });
            }

            let children = handle
                .children
                .borrow()
                .iter()
                .filter_map(|child| convert_node(child, removed))
                .collect();

            Some(TemplateNode::Element(ElementNode {
                kind: NodeKind::for_tag(&tag),
                tag,
                attributes,
                children,
            }))
        }

        NodeData::Document
        | NodeData::Doctype { .. }
        | NodeData::Comment { .. }
        | NodeData::ProcessingInstruction { .. } => None,
    }
}

//! Template Resolver
//!
//! A label index maps a normalized label to the positions of every node that
//! carries it, either as its identity (`id`) or as its display label
//! (`inkscape:label`). Positions are child-index paths from the root, so the
//! index built on the canonical template addresses the same nodes in any deep
//! copy of it.

use std::collections::HashMap;

use crate::template::{Document, ElementNode, NodeKind, TemplateNode};
use crate::visitor::{walk_node, TemplateVisitor};

/// Child indices from the root element down to a node. The root is `[]`.
pub type NodePath = Vec<usize>;

/// Trim, then strip one pair of delimiting angle brackets: `<name>` and `name`
/// address the same nodes.
pub fn normalize_label(label: &str) -> &str {
    let trimmed = label.trim();
    match trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
    {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelIndex {
    entries: HashMap<String, Vec<NodePath>>,
}

impl LabelIndex {
    /// Every node matching `label`, in document order. Empty on a miss.
    pub fn find(&self, label: &str) -> &[NodePath] {
        self.entries
            .get(normalize_label(label))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, label: &str) -> bool {
        !self.find(label).is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `label` against `document`.
    pub fn find_nodes<'d>(&self, document: &'d Document, label: &str) -> Vec<&'d ElementNode> {
        self.find(label)
            .iter()
            .filter_map(|path| node_at(&document.root, path))
            .collect()
    }

    /// Kinds of the nodes `label` resolves to, in document order.
    pub fn kinds(&self, document: &Document, label: &str) -> Vec<NodeKind> {
        self.find_nodes(document, label)
            .into_iter()
            .map(|el| el.kind)
            .collect()
    }

    fn insert(&mut self, label: &str, path: &[usize]) {
        let key = normalize_label(label);
        if key.is_empty() {
            return;
        }
        let paths = self.entries.entry(key.to_string()).or_default();
        if paths.last().map(Vec::as_slice) != Some(path) {
            paths.push(path.to_vec());
        }
    }
}

/// Build the label index of a template, once per template.
pub fn build_index(document: &Document) -> LabelIndex {
    let mut builder = IndexBuilder {
        index: LabelIndex::default(),
        path: Vec::new(),
    };
    builder.visit_element(&document.root);
    builder.index
}

struct IndexBuilder {
    index: LabelIndex,
    path: Vec<usize>,
}

impl<'a> TemplateVisitor<'a> for IndexBuilder {
    fn visit_element(&mut self, element: &'a ElementNode) {
        if let Some(id) = element.identity() {
            self.index.insert(id, &self.path);
        }
        if let Some(label) = element.label() {
            self.index.insert(label, &self.path);
        }
        crate::visitor::walk_element(self, element);
    }

    fn visit_child(&mut self, index: usize, node: &'a TemplateNode) {
        self.path.push(index);
        walk_node(self, node);
        self.path.pop();
    }
}

pub fn node_at<'a>(root: &'a ElementNode, path: &[usize]) -> Option<&'a ElementNode> {
    let mut current = root;
    for &i in path {
        current = current.children.get(i)?.as_element()?;
    }
    Some(current)
}

pub fn node_at_mut<'a>(root: &'a mut ElementNode, path: &[usize]) -> Option<&'a mut ElementNode> {
    let mut current = root;
    for &i in path {
        current = current.children.get_mut(i)?.as_element_mut()?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = r#"<svg viewBox="0 0 10 10">
<g id="layer1" inkscape:label="show_logo" inkscape:groupmode="layer">
  <text id="name" inkscape:label="&lt;name&gt;">x</text>
  <text inkscape:label="name">y</text>
</g>
<rect id="frame" inkscape:label=" frame "/>
</svg>"#;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("<name>"), "name");
        assert_eq!(normalize_label("  <name> "), "name");
        assert_eq!(normalize_label("name"), "name");
        assert_eq!(normalize_label("<name"), "<name");
        assert_eq!(normalize_label("Name"), "Name");
    }

    #[test]
    fn test_label_and_identity_match() {
        let doc = Document::parse(TEMPLATE).unwrap();
        let index = build_index(&doc);

        let names = index.find_nodes(&doc, "name");
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].text_content(), "x");
        assert_eq!(names[1].text_content(), "y");
        assert_eq!(index.find("<name>"), index.find("name"));

        // id and label on the same node give one match, not two
        assert_eq!(index.find("frame").len(), 1);
        assert_eq!(index.kinds(&doc, "show_logo"), vec![NodeKind::Container]);
        assert_eq!(index.find("layer1"), index.find("show_logo"));
    }

    #[test]
    fn test_case_sensitive_miss() {
        let doc = Document::parse(TEMPLATE).unwrap();
        let index = build_index(&doc);
        assert!(index.find("NAME").is_empty());
        assert!(!index.contains("subtitle"));
    }

    #[test]
    fn test_paths_address_deep_copy() {
        let doc = Document::parse(TEMPLATE).unwrap();
        let index = build_index(&doc);
        let mut copy = doc.deep_copy();
        let path = index.find("frame")[0].clone();
        node_at_mut(&mut copy.root, &path)
            .unwrap()
            .set_attr("stroke", "#00ff00");
        assert_eq!(node_at(&copy.root, &path).unwrap().attr("stroke"), Some("#00ff00"));
        assert_eq!(node_at(&doc.root, &path).unwrap().attr("stroke"), None);
    }
}

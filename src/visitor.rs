use crate::template::{ElementNode, TemplateNode, TextNode};

/// The single authoritative traversal mechanism for template trees.
///
/// Rules:
/// 1. Traversal order is document order and fixed.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call the matching `walk_*` function to continue traversal
///    unless pruning is intended.
/// 4. No manual recursion outside of this system.
pub trait TemplateVisitor<'a> {
    fn visit_element(&mut self, element: &'a ElementNode) {
        walk_element(self, element);
    }

    fn visit_text(&mut self, _text: &'a TextNode) {
        // Leaf node, nothing to walk by default
    }

    /// Called for every child with its position in the parent.
    fn visit_child(&mut self, _index: usize, node: &'a TemplateNode) {
        walk_node(self, node);
    }
}

pub fn walk_node<'a, V: TemplateVisitor<'a> + ?Sized>(visitor: &mut V, node: &'a TemplateNode) {
    match node {
        TemplateNode::Element(el) => visitor.visit_element(el),
        TemplateNode::Text(t) => visitor.visit_text(t),
    }
}

pub fn walk_element<'a, V: TemplateVisitor<'a> + ?Sized>(visitor: &mut V, element: &'a ElementNode) {
    for (index, child) in element.children.iter().enumerate() {
        visitor.visit_child(index, child);
    }
}

/// Mutable counterpart of `TemplateVisitor`, used on per-row copies only.
pub trait TemplateVisitorMut {
    fn visit_element_mut(&mut self, element: &mut ElementNode) {
        walk_element_mut(self, element);
    }

    fn visit_text_mut(&mut self, _text: &mut TextNode) {}
}

pub fn walk_node_mut<V: TemplateVisitorMut + ?Sized>(visitor: &mut V, node: &mut TemplateNode) {
    match node {
        TemplateNode::Element(el) => visitor.visit_element_mut(el),
        TemplateNode::Text(t) => visitor.visit_text_mut(t),
    }
}

pub fn walk_element_mut<V: TemplateVisitorMut + ?Sized>(visitor: &mut V, element: &mut ElementNode) {
    for child in element.children.iter_mut() {
        walk_node_mut(visitor, child);
    }
}

//! Breadth-first walk over a root and every shadow root reachable beneath it.
//!
//! Each scope is visited once. A scope whose serialized content does not
//! contain the target contributes no text, but its nested shadow roots are
//! still visited since their content never shows up in the host's markup.

use std::collections::VecDeque;

use crate::dom::{escape_text, Document, NodeId, NodeKind};

/// Elements whose text is never rendered and therefore never matched.
const NON_RENDERING: &[&str] = &["head", "noscript", "script", "style", "template", "title"];

/// True if `target` occurs as text in the serialized content of `root` or of any
/// shadow root reachable beneath it.
pub fn contains(doc: &Document, root: NodeId, target: &str) -> bool {
    let markup = escape_text(target);
    let mut queue = VecDeque::from([root]);
    while let Some(scope) = queue.pop_front() {
        if doc.inner_html(scope).contains(&markup) {
            return true;
        }
        enqueue_shadow_roots(doc, scope, &mut queue);
    }
    false
}

/// Leaf text nodes of every scope containing `target`, in breadth-first scope
/// order and document order within a scope. Nodes for which `exclude`
/// returns true are skipped.
pub fn collect_text<F>(doc: &Document, root: NodeId, target: &str, mut exclude: F) -> Vec<NodeId>
where
    F: FnMut(&Document, NodeId) -> bool,
{
    let markup = escape_text(target);
    let mut out = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(scope) = queue.pop_front() {
        if doc.inner_html(scope).contains(&markup) {
            collect_scope(doc, scope, &mut exclude, &mut out);
        }
        enqueue_shadow_roots(doc, scope, &mut queue);
    }
    out
}

fn collect_scope<F>(doc: &Document, scope: NodeId, exclude: &mut F, out: &mut Vec<NodeId>)
where
    F: FnMut(&Document, NodeId) -> bool,
{
    let mut stack: Vec<NodeId> = doc.children(scope).iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        match doc.kind(node) {
            NodeKind::Text(_) => {
                if !exclude(doc, node) {
                    out.push(node);
                }
            }
            NodeKind::Element(el) if NON_RENDERING.contains(&el.name.as_str()) => {}
            _ => stack.extend(doc.children(node).iter().rev()),
        }
    }
}

fn enqueue_shadow_roots(doc: &Document, scope: NodeId, queue: &mut VecDeque<NodeId>) {
    if let Some(sr) = doc.shadow_root(scope) {
        queue.push_back(sr);
    }
    queue.extend(doc.descendants(scope).filter_map(|n| doc.shadow_root(n)));
}

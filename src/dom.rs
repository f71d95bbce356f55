//! In-memory document tree.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Ids are never
//! reused within a document, so an id held across mutations either still
//! names the same node or names a detached one. Detached nodes stay in the
//! arena until the document is dropped.
//!
//! Elements may host a shadow root. Shadow roots are not children of their
//! host: ordinary traversal ([`Document::descendants`], [`Document::inner_html`])
//! stays inside one scope and callers cross scopes explicitly through
//! [`Document::shadow_root`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::selector::SelectorList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub shadow_root: Option<NodeId>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|v| v.split_whitespace().any(|c| c == class))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    ShadowRoot { host: NodeId },
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Declarative description of a subtree, used to load pages from JSON.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum NodeSpec {
    Text(String),
    Element {
        tag: String,
        #[serde(default)]
        attrs: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(default)]
        shadow: Option<Vec<NodeSpec>>,
    },
}

/// A text node folded into its preceding sibling by [`Document::normalize`]:
/// byte `n` of `from` is now byte `n + shift` of `into`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Merged {
    pub from: NodeId,
    pub into: NodeId,
    pub shift: usize,
}

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Document {
    id: u64,
    nodes: Vec<NodeData>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            id: NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed),
            nodes: vec![NodeData { kind: NodeKind::Document, parent: None, children: Vec::new() }],
        }
    }

    /// Builds a document whose root holds `children`.
    pub fn from_spec(children: &[NodeSpec]) -> Self {
        let mut doc = Self::new();
        let root = doc.root();
        for spec in children {
            let node = doc.build(spec);
            doc.append_child(root, node);
        }
        doc
    }

    fn build(&mut self, spec: &NodeSpec) -> NodeId {
        match spec {
            NodeSpec::Text(text) => self.create_text(text.clone()),
            NodeSpec::Element { tag, attrs, children, shadow } => {
                let el = self.create_element_with(tag, attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
                for child in children {
                    let c = self.build(child);
                    self.append_child(el, c);
                }
                if let Some(shadow_children) = shadow {
                    if let Some(sr) = self.attach_shadow(el) {
                        for child in shadow_children {
                            let c = self.build(child);
                            self.append_child(sr, c);
                        }
                    }
                }
                el
            }
        }
    }

    /// Identifies this document instance; distinct across every document created in the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Whether `id` belongs to this document's arena. Ids from another document may not.
    pub fn has(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData { kind, parent: None, children: Vec::new() });
        id
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.create_element_with(name, std::iter::empty())
    }

    pub fn create_element_with(
        &mut self,
        name: &str,
        attributes: impl IntoIterator<Item = (String, String)>,
    ) -> NodeId {
        self.push(NodeKind::Element(Element {
            name: name.to_ascii_lowercase(),
            attributes: attributes.into_iter().collect(),
            shadow_root: None,
        }))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Comment(text.into()))
    }

    /// Attaches a shadow root to `host`, returning the existing one if present.
    /// Returns `None` when `host` is not an element.
    pub fn attach_shadow(&mut self, host: NodeId) -> Option<NodeId> {
        let el = self.element(host)?;
        if let Some(existing) = el.shadow_root {
            return Some(existing);
        }
        let sr = self.push(NodeKind::ShadowRoot { host });
        if let NodeKind::Element(el) = &mut self.nodes[host.index()].kind {
            el.shadow_root = Some(sr);
        }
        Some(sr)
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.element(host).and_then(|el| el.shadow_root)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.index()].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.index()].kind {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Text(_))
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|el| el.attribute(name))
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let NodeKind::Element(el) = &mut self.nodes[id.index()].kind {
            let value = value.into();
            match el.attributes.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some(slot) => slot.1 = value,
                None => el.attributes.push((name.to_string(), value)),
            }
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// The document or shadow root that scopes `id`, or the top of a detached subtree.
    pub fn scope_root(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            cur = p;
        }
        cur
    }

    /// True when `id` is reachable from the document root, possibly through shadow hosts.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            let top = self.scope_root(cur);
            match self.kind(top) {
                NodeKind::Document => return top == self.root(),
                NodeKind::ShadowRoot { host } => cur = *host,
                _ => return false,
            }
        }
    }

    pub fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes[child.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|c| *c != child);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Inserts `child` under `parent` before `reference`, or last when `reference` is
    /// `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.detach(child);
        let siblings = &mut self.nodes[parent.index()].children;
        let at = reference
            .and_then(|r| siblings.iter().position(|c| *c == r))
            .unwrap_or(siblings.len());
        siblings.insert(at, child);
        self.nodes[child.index()].parent = Some(parent);
    }

    /// Puts `new` where `old` is and detaches `old`. No-op if `old` is detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.parent(old) else { return };
        self.detach(new);
        let siblings = &mut self.nodes[parent.index()].children;
        if let Some(at) = siblings.iter().position(|c| *c == old) {
            siblings[at] = new;
            self.nodes[new.index()].parent = Some(parent);
            self.nodes[old.index()].parent = None;
        }
    }

    /// Splits a text node at byte `offset`, keeping the head in `id` and moving
    /// the tail into a new sibling inserted right after it. Returns the tail.
    ///
    /// Returns `None` if `id` is not text or `offset` is not a char boundary.
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> Option<NodeId> {
        let NodeKind::Text(text) = &mut self.nodes[id.index()].kind else { return None };
        if !text.is_char_boundary(offset) {
            return None;
        }
        let tail = text.split_off(offset);
        let tail_id = self.create_text(tail);
        if let Some(parent) = self.parent(id) {
            let next = self.next_sibling(id);
            self.insert_before(parent, tail_id, next);
        }
        Some(tail_id)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let at = siblings.iter().position(|c| *c == id)?;
        siblings.get(at + 1).copied()
    }

    /// Merges adjacent text children and drops empty ones, recursively within the scope.
    /// Returns where every merged-away text node's content now lives.
    pub fn normalize(&mut self, id: NodeId) -> Vec<Merged> {
        let mut merged = Vec::new();
        self.normalize_into(id, &mut merged);
        merged
    }

    fn normalize_into(&mut self, id: NodeId, merged: &mut Vec<Merged>) {
        let children = std::mem::take(&mut self.nodes[id.index()].children);
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            if let NodeKind::Text(t) = &self.nodes[child.index()].kind {
                let prev = kept.last().copied().filter(|p| self.is_text(*p));
                if t.is_empty() || prev.is_some() {
                    let add = t.clone();
                    self.nodes[child.index()].parent = None;
                    if let Some(prev) = prev {
                        if let NodeKind::Text(p) = &mut self.nodes[prev.index()].kind {
                            merged.push(Merged { from: child, into: prev, shift: p.len() });
                            p.push_str(&add);
                        }
                    }
                    continue;
                }
            }
            kept.push(child);
        }
        self.nodes[id.index()].children = kept;
        let elements: Vec<NodeId> = self.children(id).iter().copied().filter(|c| !self.is_text(*c)).collect();
        for el in elements {
            self.normalize_into(el, merged);
        }
    }

    /// Pre-order traversal of the subtree under `id` (excluding `id`), not entering shadow roots.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(id).to_vec();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// Concatenated text of the subtree, within the scope.
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(t) = self.text(id) {
            return t.to_string();
        }
        self.descendants(id).filter_map(|n| self.text(n)).collect()
    }

    /// Nearest inclusive ancestor element of `id` matching `selectors`, not crossing the scope root.
    pub fn closest(&self, id: NodeId, selectors: &SelectorList) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(node) = cur {
            match self.kind(node) {
                NodeKind::Element(el) if selectors.matches(el) => return Some(node),
                NodeKind::Document | NodeKind::ShadowRoot { .. } => return None,
                _ => {}
            }
            cur = self.parent(node);
        }
        None
    }

    /// Serialized light-tree content of `id`.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &c in self.children(id) {
            self.serialize(c, false, &mut out);
        }
        out
    }

    /// Serialization that also renders attached shadow roots as declarative
    /// `<template shadowrootmode="open">` children.
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        match self.kind(id) {
            NodeKind::Document | NodeKind::ShadowRoot { .. } => {
                for &c in self.children(id) {
                    self.serialize(c, true, &mut out);
                }
            }
            _ => self.serialize(id, true, &mut out),
        }
        out
    }

    fn serialize(&self, id: NodeId, with_shadow: bool, out: &mut String) {
        match self.kind(id) {
            NodeKind::Text(t) => escape_into(t, false, out),
            NodeKind::Comment(t) => {
                let _ = write!(out, "<!--{t}-->");
            }
            NodeKind::Document | NodeKind::ShadowRoot { .. } => {
                for &c in self.children(id) {
                    self.serialize(c, with_shadow, out);
                }
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.name);
                for (k, v) in &el.attributes {
                    let _ = write!(out, " {k}=\"");
                    escape_into(v, true, out);
                    out.push('"');
                }
                out.push('>');
                if is_void(&el.name) {
                    return;
                }
                if with_shadow {
                    if let Some(sr) = el.shadow_root {
                        out.push_str("<template shadowrootmode=\"open\">");
                        for &c in self.children(sr) {
                            self.serialize(c, true, out);
                        }
                        out.push_str("</template>");
                    }
                }
                for &c in self.children(id) {
                    self.serialize(c, with_shadow, out);
                }
                let _ = write!(out, "</{}>", el.name);
            }
        }
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let next = self.stack.pop()?;
        self.stack.extend(self.doc.children(next).iter().rev());
        Some(next)
    }
}

fn is_void(name: &str) -> bool {
    matches!(
        name,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta" | "source" | "track" | "wbr"
    )
}

/// `text` as it appears inside serialized markup.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(text, false, &mut out);
    out
}

fn escape_into(s: &str, attr: bool, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

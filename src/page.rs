//! The live page features operate on: a document, its URL and the user's selection.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;

use crate::dom::{Document, Merged, NodeId};

/// A position inside a text node, as a byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub node: NodeId,
    pub offset: usize,
}

impl Point {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }

    /// Follows `node` into the sibling it was merged into, if any.
    pub fn remap(self, merged: &[Merged]) -> Self {
        match merged.iter().find(|m| m.from == self.node) {
            Some(m) => Self { node: m.into, offset: self.offset + m.shift },
            None => self,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

/// A selection resolved against a document: ordered endpoints plus every text
/// node the range touches, in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionRange {
    pub start: Point,
    pub end: Point,
    pub nodes: Vec<NodeId>,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    pub fn remap(self, merged: &[Merged]) -> Self {
        Self { anchor: self.anchor.remap(merged), focus: self.focus.remap(merged) }
    }

    /// Resolves the selection when both endpoints are text nodes of the same scope.
    pub fn resolve(&self, doc: &Document) -> Option<SelectionRange> {
        let (a, f) = (self.anchor, self.focus);
        if !doc.has(a.node) || !doc.has(f.node) {
            return None;
        }
        let a_len = doc.text(a.node)?.len();
        let f_len = doc.text(f.node)?.len();
        if a.offset > a_len || f.offset > f_len {
            return None;
        }
        if a.node == f.node {
            let (start, end) = if a.offset <= f.offset { (a, f) } else { (f, a) };
            return Some(SelectionRange { start, end, nodes: vec![a.node] });
        }
        let scope = doc.scope_root(a.node);
        if doc.scope_root(f.node) != scope {
            return None;
        }
        let order: Vec<NodeId> = doc.descendants(scope).filter(|n| doc.is_text(*n)).collect();
        let ai = order.iter().position(|n| *n == a.node)?;
        let fi = order.iter().position(|n| *n == f.node)?;
        let (start, end, lo, hi) = if ai < fi { (a, f, ai, fi) } else { (f, a, fi, ai) };
        Some(SelectionRange { start, end, nodes: order[lo..=hi].to_vec() })
    }
}

impl SelectionRange {
    pub fn text(&self, doc: &Document) -> String {
        let mut out = String::new();
        for &node in &self.nodes {
            let Some(t) = doc.text(node) else { continue };
            let from = if node == self.start.node { self.start.offset } else { 0 };
            let to = if node == self.end.node { self.end.offset } else { t.len() };
            if let Some(part) = t.get(from..to) {
                out.push_str(part);
            }
        }
        out
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// The same range after text nodes were merged by normalization.
    pub fn remap(&self, merged: &[Merged]) -> Self {
        let mut nodes: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let node = Point::new(*node, 0).remap(merged).node;
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
        Self { start: self.start.remap(merged), end: self.end.remap(merged), nodes }
    }
}

/// Sent on every selection change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionChanged;

/// Shared handle to the page. Cloning is cheap.
#[derive(Clone)]
pub struct Page {
    inner: Arc<PageInner>,
}

struct PageInner {
    document: Mutex<Document>,
    url: RwLock<String>,
    selection: RwLock<Option<Selection>>,
    selection_tx: broadcast::Sender<SelectionChanged>,
}

impl Page {
    pub fn new(url: impl Into<String>, document: Document) -> Self {
        Self {
            inner: Arc::new(PageInner {
                document: Mutex::new(document),
                url: RwLock::new(url.into()),
                selection: RwLock::new(None),
                selection_tx: broadcast::channel(64).0,
            }),
        }
    }

    pub fn url(&self) -> String {
        self.inner.url.read().clone()
    }

    /// In-page navigation: the URL changes, the document stays.
    pub fn navigate(&self, url: impl Into<String>) {
        *self.inner.url.write() = url.into();
    }

    /// Full load: replaces the document and drops the selection.
    pub fn load(&self, url: impl Into<String>, document: Document) {
        *self.inner.document.lock() = document;
        *self.inner.url.write() = url.into();
        self.set_selection(None);
    }

    /// Locks the document. Never hold the guard across an `.await`.
    pub fn document(&self) -> MutexGuard<'_, Document> {
        self.inner.document.lock()
    }

    pub fn selection(&self) -> Option<Selection> {
        *self.inner.selection.read()
    }

    pub fn set_selection(&self, selection: Option<Selection>) {
        *self.inner.selection.write() = selection;
        // No receivers is fine: nothing is listening yet.
        let _ = self.inner.selection_tx.send(SelectionChanged);
    }

    /// Moves the selection off text nodes that were merged away. Not broadcast:
    /// the selected text is unchanged.
    pub fn remap_selection(&self, merged: &[Merged]) {
        if merged.is_empty() {
            return;
        }
        let mut selection = self.inner.selection.write();
        if let Some(sel) = selection.as_mut() {
            *sel = sel.remap(merged);
        }
    }

    /// Selects the first occurrence of `needle` inside a single text node of the
    /// light tree, returning the new selection.
    pub fn select_text(&self, needle: &str) -> Option<Selection> {
        if needle.is_empty() {
            return None;
        }
        let selection = {
            let doc = self.document();
            doc.descendants(doc.root()).find_map(|node| {
                let at = doc.text(node)?.find(needle)?;
                Some(Selection::new(Point::new(node, at), Point::new(node, at + needle.len())))
            })
        }?;
        self.set_selection(Some(selection));
        Some(selection)
    }

    pub fn subscribe_selection(&self) -> broadcast::Receiver<SelectionChanged> {
        self.inner.selection_tx.subscribe()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("url", &self.url()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSpec;

    fn doc() -> Document {
        Document::from_spec(&[
            NodeSpec::Element {
                tag: "p".into(),
                attrs: Default::default(),
                children: vec![NodeSpec::Text("alpha beta".into())],
                shadow: None,
            },
            NodeSpec::Element {
                tag: "p".into(),
                attrs: Default::default(),
                children: vec![NodeSpec::Text("gamma delta".into())],
                shadow: None,
            },
        ])
    }

    #[test]
    fn resolves_backwards_selection_across_nodes() {
        let d = doc();
        let texts: Vec<NodeId> = d.descendants(d.root()).filter(|n| d.is_text(*n)).collect();
        let sel = Selection::new(Point::new(texts[1], 5), Point::new(texts[0], 6));
        let range = sel.resolve(&d).unwrap();
        assert_eq!(range.start, Point::new(texts[0], 6));
        assert_eq!(range.nodes, texts);
        assert_eq!(range.text(&d), "betagamma");
    }

    #[test]
    fn out_of_range_offset_does_not_resolve() {
        let d = doc();
        let t = d.descendants(d.root()).find(|n| d.is_text(*n)).unwrap();
        assert!(Selection::new(Point::new(t, 0), Point::new(t, 99)).resolve(&d).is_none());
    }

    #[test]
    fn selection_follows_merged_text() {
        let page = Page::new("https://example.com/", doc());
        let (head, tail) = {
            let mut d = page.document();
            let head = d.descendants(d.root()).find(|n| d.is_text(*n)).unwrap();
            (head, d.split_text(head, 6).unwrap())
        };
        page.set_selection(Some(Selection::new(Point::new(tail, 0), Point::new(tail, 4))));
        let mut rx = page.subscribe_selection();

        let merged = {
            let mut d = page.document();
            let root = d.root();
            d.normalize(root)
        };
        page.remap_selection(&merged);

        let sel = page.selection().unwrap();
        assert_eq!(sel, Selection::new(Point::new(head, 6), Point::new(head, 10)));
        let d = page.document();
        assert_eq!(sel.resolve(&d).unwrap().text(&d), "beta");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn select_text_broadcasts() {
        let page = Page::new("https://example.com/", doc());
        let mut rx = page.subscribe_selection();
        let sel = page.select_text("delta").unwrap();
        assert_eq!(rx.recv().await.unwrap(), SelectionChanged);
        let range = sel.resolve(&page.document()).unwrap();
        assert_eq!(range.text(&page.document()), "delta");
        assert!(page.select_text("missing").is_none());
    }
}

// feature-runtime/src/highlight.rs

//! Highlights every other occurrence of the selected text on the page.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};

use crate::{
    config::RuntimeConfig,
    debounce::Debouncer,
    dom::{Document, Merged, NodeId},
    error::ConfigError,
    feature::{Feature, FeatureContext, FeatureKind, Teardown},
    page::{Selection, SelectionRange},
    runtime::Runtime,
    selector::SelectorList,
    walker,
};

pub const NAME: &str = "text-highlight";

/// User options, stored as the feature's JSON value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct HighlightOptions {
    /// Inline style put on every wrapper.
    pub highlight_style: String,
    /// Leave the selected occurrence itself alone.
    pub exclude_self: bool,
    /// Never annotate text under these selectors. Checked per text node.
    pub exclude_parents: Vec<String>,
    /// Selections starting under these selectors are ignored.
    pub no_highlight_within: Vec<String>,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            highlight_style: "background-color: yellow".into(),
            exclude_self: true,
            exclude_parents: Vec::new(),
            no_highlight_within: vec!["input".into(), "textarea".into(), "[contenteditable]".into()],
        }
    }
}

impl HighlightOptions {
    /// Parses a JSON value and checks that every selector compiles.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let opts: Self = serde_json::from_str(value).map_err(|e| ConfigError::invalid_value(NAME, e))?;
        opts.compile()?;
        Ok(opts)
    }

    pub fn compile(&self) -> Result<CompiledOptions, ConfigError> {
        Ok(CompiledOptions {
            style: self.highlight_style.clone(),
            exclude_self: self.exclude_self,
            exclude_parents: SelectorList::parse_all(&self.exclude_parents)?,
            no_highlight_within: SelectorList::parse_all(&self.no_highlight_within)?,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

#[derive(Clone, Debug)]
pub struct CompiledOptions {
    style: String,
    exclude_self: bool,
    exclude_parents: SelectorList,
    no_highlight_within: SelectorList,
}

/// What one selection change did to the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Selection starts in a no-highlight region, or the engine is shut down.
    Ignored,
    /// Same search as last time.
    Unchanged,
    /// Search too short or empty; annotations removed.
    Cleared,
    /// Annotations rebuilt; this many wrappers inserted.
    Annotated(usize),
}

/// Wraps occurrences of the current selection in styled `span`s and removes
/// them again. Idle when no wrappers are recorded.
#[derive(Debug)]
pub struct HighlightEngine {
    opts: CompiledOptions,
    min_len: usize,
    previous: Option<String>,
    wrappers: Vec<NodeId>,
    merged: Vec<Merged>,
    doc_id: Option<u64>,
    disabled: bool,
}

impl HighlightEngine {
    pub fn new(opts: CompiledOptions, min_len: usize) -> Self {
        Self { opts, min_len, previous: None, wrappers: Vec::new(), merged: Vec::new(), doc_id: None, disabled: false }
    }

    pub fn annotations(&self) -> &[NodeId] { &self.wrappers }

    pub fn previous_search(&self) -> Option<&str> { self.previous.as_deref() }

    /// Text nodes merged away since the last call. Selections pointing into
    /// them should be moved with [`Selection::remap`].
    pub fn take_merged(&mut self) -> Vec<Merged> { std::mem::take(&mut self.merged) }

    /// Wrappers recorded against another document are forgotten, never unwrapped.
    fn adopt(&mut self, doc: &Document) {
        if self.doc_id != Some(doc.id()) {
            if !self.wrappers.is_empty() {
                debug!(stale = self.wrappers.len(), "document replaced; dropping annotations");
            }
            self.wrappers.clear();
            self.merged.clear();
            self.previous = None;
            self.doc_id = Some(doc.id());
        }
    }

    pub fn on_selection(&mut self, doc: &mut Document, selection: Option<&Selection>) -> Outcome {
        if self.disabled {
            return Outcome::Ignored;
        }
        self.adopt(doc);

        if let Some(sel) = selection {
            if doc.has(sel.anchor.node) && doc.closest(sel.anchor.node, &self.opts.no_highlight_within).is_some() {
                trace!("selection inside a no-highlight region");
                return Outcome::Ignored;
            }
        }

        let search = selection.and_then(|s| s.resolve(doc)).map(|r| r.text(doc)).unwrap_or_default();
        if search.trim().is_empty() || search.chars().count() <= self.min_len {
            self.clear(doc);
            self.previous = None;
            return Outcome::Cleared;
        }
        if self.previous.as_deref() == Some(search.as_str()) {
            return Outcome::Unchanged;
        }

        let range = selection.filter(|_| self.opts.exclude_self).and_then(|s| s.resolve(doc));
        self.clear(doc);
        let range = range.map(|r| r.remap(&self.merged));
        let count = self.annotate(doc, &search, range.as_ref());
        debug!(search = %search, wrappers = count, "annotated");
        self.previous = Some(search);
        Outcome::Annotated(count)
    }

    fn annotate(&mut self, doc: &mut Document, search: &str, range: Option<&SelectionRange>) -> usize {
        let exclude = &self.opts.exclude_parents;
        let targets = walker::collect_text(doc, doc.root(), search, |doc, node| {
            !exclude.is_empty() && doc.closest(node, exclude).is_some()
        });

        let before = self.wrappers.len();
        for node in targets {
            let node = match range {
                Some(r) if r.contains(node) => match after_selection(doc, node, r, search) {
                    Some(tail) => tail,
                    None => continue,
                },
                _ => node,
            };
            self.wrap_all(doc, node, search);
        }
        self.wrappers.len() - before
    }

    /// Wraps each occurrence in `node`, moving a cursor over the unmatched tail.
    fn wrap_all(&mut self, doc: &mut Document, node: NodeId, search: &str) {
        let mut cursor = Some(node);
        while let Some(cur) = cursor.take() {
            let Some(text) = doc.text(cur) else { break };
            let Some(at) = text.find(search) else { break };
            let whole = at == 0 && text.len() == search.len();

            let matched = if at > 0 {
                match doc.split_text(cur, at) {
                    Some(m) => m,
                    None => break,
                }
            } else {
                cur
            };
            if !whole && doc.text(matched).is_some_and(|t| t.len() > search.len()) {
                cursor = doc.split_text(matched, search.len());
            }

            let wrapper = doc.create_element_with("span", [("style".to_string(), self.opts.style.clone())]);
            let copy = doc.create_text(search);
            doc.append_child(wrapper, copy);
            doc.replace(matched, wrapper);
            self.wrappers.push(wrapper);
        }
    }

    /// Unwraps every recorded wrapper into plain text and normalizes the
    /// parents. Returns how many wrappers were removed.
    pub fn clear(&mut self, doc: &mut Document) -> usize {
        self.adopt(doc);
        self.merged.clear();
        let mut parents: Vec<NodeId> = Vec::new();
        let mut removed = 0;
        for wrapper in std::mem::take(&mut self.wrappers) {
            let Some(parent) = doc.parent(wrapper) else { continue };
            // Reuse the wrapper's own text node so a selection inside it survives.
            let own = match doc.children(wrapper) {
                [only] if doc.is_text(*only) => Some(*only),
                _ => None,
            };
            let text = match own {
                Some(t) => t,
                None => doc.create_text(doc.text_content(wrapper)),
            };
            doc.replace(wrapper, text);
            removed += 1;
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        for parent in parents {
            let merged = doc.normalize(parent);
            self.merged.extend(merged);
        }
        removed
    }

    /// Clears and stops reacting to further selections.
    pub fn shutdown(&mut self, doc: &mut Document) {
        self.clear(doc);
        self.previous = None;
        self.disabled = true;
    }
}

/// The part of a selected text node that follows the selection end, if the
/// search occurs there again. Nodes inside the selection yield nothing.
fn after_selection(doc: &mut Document, node: NodeId, range: &SelectionRange, search: &str) -> Option<NodeId> {
    if node != range.end.node {
        return None;
    }
    let tail = doc.text(node)?.get(range.end.offset..)?;
    if !tail.contains(search) {
        return None;
    }
    if range.end.offset == 0 {
        return Some(node);
    }
    doc.split_text(node, range.end.offset)
}

/// The `text-highlight` feature: debounced selection events drive a
/// [`HighlightEngine`] over the page document.
pub struct TextHighlightFeature {
    config: RuntimeConfig,
    teardown: Teardown,
}

impl TextHighlightFeature {
    pub fn new(rt: &Runtime) -> Self {
        Self { config: rt.config().clone(), teardown: Teardown::new() }
    }
}

#[async_trait]
impl Feature for TextHighlightFeature {
    fn name(&self) -> &'static str { NAME }

    fn description(&self) -> &'static str { "Highlight other occurrences of the selected text" }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Configurable { default: HighlightOptions::default().to_json() }
    }

    fn should_run(&self, ctx: &FeatureContext) -> Result<bool> {
        let url = ctx.page.url();
        Ok(!url.starts_with("about:") && !url.starts_with("chrome:"))
    }

    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        self.teardown.drain();
        let opts = match ctx.value.as_deref() {
            Some(v) => HighlightOptions::parse(v)?,
            None => HighlightOptions::default(),
        };
        let engine = Arc::new(Mutex::new(HighlightEngine::new(opts.compile()?, self.config.min_search_len)));
        let page = ctx.page.clone();

        let debouncer = {
            let (engine, page) = (engine.clone(), page.clone());
            Arc::new(Debouncer::new(self.config.debounce(), move || {
                let selection = page.selection();
                let mut doc = page.document();
                let mut engine = engine.lock();
                let outcome = engine.on_selection(&mut doc, selection.as_ref());
                page.remap_selection(&engine.take_merged());
                trace!(?outcome, "selection handled");
            }))
        };

        let mut events = page.subscribe_selection();
        let listener = {
            let debouncer = debouncer.clone();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(_) | Err(RecvError::Lagged(_)) => debouncer.trigger(),
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        self.teardown.push(move || listener.abort());
        self.teardown.push(move || debouncer.cancel());
        self.teardown.push(move || {
            let mut doc = page.document();
            let mut engine = engine.lock();
            engine.shutdown(&mut doc);
            page.remap_selection(&engine.take_merged());
        });
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let n = self.teardown.drain();
        if n > 0 {
            debug!(feature = NAME, actions = n, "torn down");
        }
        Ok(())
    }

    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        HighlightOptions::parse(value).map(|_| ())
    }

    fn format(&self, value: &str) -> Result<String, ConfigError> {
        Ok(HighlightOptions::parse(value)?.to_json())
    }
}

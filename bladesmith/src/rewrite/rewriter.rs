//! The traversal driver.
//!
//! Walks the input tree in document order, runs the visitors at each node,
//! then interprets the node's [`Operation`] by telling the
//! [`DocumentBuilder`] what to copy and what to synthesize.

use super::context::{AttributeChange, Operation, OperationKind, RewriteContext};
use super::path::NodePath;
use super::tree_builder::{ChildPosition, DocumentBuilder};
use super::visitor::Visitor;
use crate::content::Content;
use crate::document::{
    Document, NodeFlags, NodeKind, SyntheticAttribute, SyntheticContent, SyntheticMeta,
    canonical_name,
};
use crate::error::RewriteError;
use compact_str::CompactString;
use indextree::NodeId;
use std::collections::HashSet;

pub(crate) struct Rewriter<'d, 'p, 'v> {
    doc: &'d Document,
    visitors: &'p mut [Box<dyn Visitor + 'v>],
    ctx: RewriteContext,
    out: DocumentBuilder<'d>,
    /// Open subtrees descended into only for their queued operations
    suppressed: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Enter,
    Leave,
}

impl<'d, 'p, 'v> Rewriter<'d, 'p, 'v> {
    pub(crate) fn new(doc: &'d Document, visitors: &'p mut [Box<dyn Visitor + 'v>]) -> Self {
        Rewriter {
            doc,
            visitors,
            ctx: RewriteContext::new(),
            out: DocumentBuilder::new(doc),
            suppressed: 0,
        }
    }

    pub(crate) fn run(mut self) -> Result<Document, RewriteError> {
        debug!(
            nodes = self.doc.node_count(),
            visitors = self.visitors.len(),
            "rewrite pass"
        );
        let doc = self.doc;
        for child in doc.root_children() {
            self.process(child)?;
            if self.ctx.is_stopped() {
                debug!("rewrite pass stopped early");
                break;
            }
        }
        debug!(operations = self.ctx.len(), "rewrite pass done");
        Ok(self.out.finish())
    }

    fn visit(&mut self, node: NodeId, phase: Phase) -> Result<(), RewriteError> {
        if self.suppressed > 0 {
            return Ok(());
        }
        let doc = self.doc;
        for visitor in self.visitors.iter_mut() {
            let mut path = NodePath::new(doc, &mut self.ctx, node);
            match phase {
                Phase::Enter => visitor.enter(&mut path)?,
                Phase::Leave => visitor.leave(&mut path)?,
            }
            if self.ctx.is_stopped() {
                break;
            }
        }
        Ok(())
    }

    fn emit_all(&mut self, contents: &[Content]) {
        for content in contents {
            self.out.add_synthetic_node(content);
        }
    }

    fn process(&mut self, node: NodeId) -> Result<(), RewriteError> {
        if self.ctx.is_stopped() {
            return Ok(());
        }
        self.visit(node, Phase::Enter)?;
        if self.ctx.is_stopped() {
            return Ok(());
        }

        let op = self.ctx.operation(node).cloned().unwrap_or_default();
        let wraps = if op.kind == OperationKind::Remove {
            &[][..]
        } else {
            &op.wrap_stack[..]
        };

        self.emit_all(&op.insert_before);
        for (before, _) in wraps.iter().rev() {
            self.out.add_synthetic_node(before);
        }

        match op.kind {
            OperationKind::Remove => trace!(?node, "removed"),
            OperationKind::Replace => self.emit_all(&op.replacement),
            OperationKind::Keep => self.keep(node)?,
            OperationKind::Wrap => self.wrap(node, &op)?,
            OperationKind::Unwrap => self.unwrap(node, &op)?,
            OperationKind::ReplaceChildren => self.replace_children(node, &op)?,
        }

        for (_, after) in wraps {
            self.out.add_synthetic_node(after);
        }
        self.emit_all(&op.insert_after);

        if matches!(op.kind, OperationKind::Remove | OperationKind::Replace)
            || self.ctx.is_stopped()
        {
            return Ok(());
        }

        // everything queued so far has been emitted
        let settled = self
            .ctx
            .operation(node)
            .map(|op| (op.prepend_children.len(), op.append_children.len()))
            .unwrap_or_default();
        self.visit(node, Phase::Leave)?;

        // Only additions made during `leave` can still take effect.
        let Some(late) = self.ctx.operation(node).cloned() else {
            return Ok(());
        };
        if let Some(extra) = late.insert_after.get(op.insert_after.len()..) {
            self.emit_all(extra);
        }
        if late.revision > op.revision
            && late.has_element_edits()
            && op.kind != OperationKind::Unwrap
            && self.doc.kind(node) == NodeKind::Element
        {
            if let Some(emitted) = self.out.emitted(node) {
                let meta = self.element_meta(node, &late);
                self.out.patch_element_meta(emitted, meta);
            }
        }
        self.attach_late_children(node, &late, settled);
        Ok(())
    }

    /// Place children queued during `leave`, after the node was emitted.
    fn attach_late_children(&mut self, node: NodeId, op: &Operation, settled: (usize, usize)) {
        let prepends = op.prepend_children.get(settled.0..).unwrap_or_default();
        let appends = op.append_children.get(settled.1..).unwrap_or_default();
        if prepends.is_empty() && appends.is_empty() {
            return;
        }
        trace!(?node, prepends = prepends.len(), appends = appends.len(), "late children");

        let doc = self.doc;
        let container = self
            .out
            .emitted(node)
            .filter(|_| op.kind != OperationKind::Unwrap && doc.has_children(node));
        if let Some(emitted) = container {
            self.out
                .insert_synthetic_children(emitted, prepends, ChildPosition::First);
            self.out
                .insert_synthetic_children(emitted, appends, ChildPosition::Last);
            return;
        }

        // An unwrapped node's first kept child anchors the prepends.
        let current = self.out.current();
        let anchor = (op.kind == OperationKind::Unwrap)
            .then(|| {
                doc.content_children(node)
                    .filter_map(|child| self.out.emitted(child))
                    .find(|&child| self.out.parent(child) == Some(current))
            })
            .flatten();
        match anchor {
            Some(anchor) => self.out.insert_synthetic_before(anchor, prepends),
            None => self.emit_all(prepends),
        }
        self.emit_all(appends);
    }

    fn visits_children(&self, node: NodeId) -> bool {
        !self.visitors.is_empty() && self.suppressed == 0 && !self.ctx.should_skip_children(node)
    }

    fn keep(&mut self, node: NodeId) -> Result<(), RewriteError> {
        let doc = self.doc;
        if self.ctx.has_element_edits(node) && doc.kind(node) == NodeKind::Element {
            return self.rebuild_element(node);
        }
        if !doc.has_children(node) {
            self.out.copy_node(node, false);
            self.emit_insertions(node);
            return Ok(());
        }

        let insertions = self
            .ctx
            .operation(node)
            .is_some_and(Operation::has_child_insertions);
        let visits = self.visits_children(node);
        if !visits && !insertions && !self.ctx.has_pending_within(doc, node) {
            self.out.copy_subtree(node);
            return Ok(());
        }

        let id = self.out.copy_node(node, false);
        self.out.push(id);
        let result = self.descend(node, visits, true);
        self.out.pop()?;
        result
    }

    /// Process the children of `node` under the current parent.
    ///
    /// Prepended children go before the first content child, appended ones
    /// right before the closing markup. With `markup` unset the node's own
    /// opening and closing markup is left out.
    fn descend(&mut self, node: NodeId, visits: bool, markup: bool) -> Result<(), RewriteError> {
        if !visits {
            self.suppressed += 1;
        }
        let result = self.children(node, markup);
        if !visits {
            self.suppressed -= 1;
        }
        result
    }

    fn children(&mut self, node: NodeId, markup: bool) -> Result<(), RewriteError> {
        let doc = self.doc;
        let mut prepended = 0;
        let mut appended = 0;
        let mut reached_content = false;

        for child in doc.children(node) {
            if self.ctx.is_stopped() {
                return Ok(());
            }
            if doc.is_opening_child(node, child) {
                if markup {
                    self.out.copy_subtree(child);
                }
                continue;
            }
            if !reached_content {
                reached_content = true;
                prepended = self.emit_prepends(node, prepended);
            }
            if doc.is_closing_child(node, child) {
                prepended = self.emit_prepends(node, prepended);
                appended = self.emit_appends(node, appended);
                if markup {
                    self.out.copy_subtree(child);
                }
                continue;
            }
            self.process(child)?;
        }

        if !self.ctx.is_stopped() {
            self.emit_prepends(node, prepended);
            self.emit_appends(node, appended);
        }
        Ok(())
    }

    /// Children queued on a node that cannot hold them go right after it.
    fn emit_insertions(&mut self, node: NodeId) {
        self.emit_prepends(node, 0);
        self.emit_appends(node, 0);
    }

    /// Emit queued prepends past the first `done`; returns the new count.
    fn emit_prepends(&mut self, node: NodeId, done: usize) -> usize {
        let pending = self
            .ctx
            .operation(node)
            .map(|op| op.prepend_children.get(done..).unwrap_or_default().to_vec())
            .unwrap_or_default();
        self.emit_all(&pending);
        done + pending.len()
    }

    fn emit_appends(&mut self, node: NodeId, done: usize) -> usize {
        let pending = self
            .ctx
            .operation(node)
            .map(|op| op.append_children.get(done..).unwrap_or_default().to_vec())
            .unwrap_or_default();
        self.emit_all(&pending);
        done + pending.len()
    }

    fn rebuild_element(&mut self, node: NodeId) -> Result<(), RewriteError> {
        let doc = self.doc;
        let op = self.ctx.operation(node).cloned().unwrap_or_default();
        let meta = self.element_meta(node, &op);
        let has_content = doc.content_children(node).next().is_some();
        trace!(?node, tag = %meta.tag_name, "rebuilding element");

        if meta.void || meta.self_closing || (!has_content && !op.has_child_insertions()) {
            self.out.add_synthetic_element(meta, Some(node));
            self.emit_insertions(node);
            return Ok(());
        }

        let mut open = meta.open_tag();
        if let Some(inner) = &meta.inner {
            open.push_str(inner);
        }
        let content = SyntheticContent::fragments(open.as_str(), meta.close_tag().as_str());
        self.out
            .open_synthetic_element(NodeKind::Element, content, Some(meta), Some(node));
        let visits = self.visits_children(node);
        let result = self.descend(node, visits, false);
        self.out.pop()?;
        result
    }

    /// The element's tag after applying queued renames and attribute changes.
    fn element_meta(&self, node: NodeId, op: &Operation) -> SyntheticMeta {
        let doc = self.doc;
        let prior = doc.synthetic_meta(node);
        let current: Vec<SyntheticAttribute> = if doc.get(node).is_synthetic() {
            prior.map(|meta| meta.attributes.clone()).unwrap_or_default()
        } else {
            doc.attributes(node)
                .into_iter()
                .map(|attr| SyntheticAttribute {
                    name: canonical_name(attr.name),
                    value: attr.value.map(CompactString::from),
                    raw: Some(CompactString::from(attr.raw)),
                })
                .collect()
        };

        let mut applied: HashSet<CompactString> = HashSet::new();
        let mut attributes = Vec::with_capacity(current.len() + op.attribute_changes.len());
        for attr in current {
            let Some(change) = op.attribute_changes.get(&attr.name) else {
                attributes.push(attr);
                continue;
            };
            if !applied.insert(attr.name.clone()) {
                continue;
            }
            if let AttributeChange::Set(value) = change {
                attributes.push(SyntheticAttribute::new(attr.name, value.clone()));
            }
        }
        for (name, change) in &op.attribute_changes {
            if applied.contains(name) {
                continue;
            }
            if let AttributeChange::Set(value) = change {
                attributes.push(SyntheticAttribute::new(name.clone(), value.clone()));
            }
        }

        let flags = doc.get(node).flags;
        let tag_name = match &op.new_tag_name {
            Some(tag) => tag.clone(),
            None => doc
                .element(node)
                .map(|element| CompactString::from(element.raw_name()))
                .unwrap_or_default(),
        };
        // implicitly closed and unterminated elements stay that way
        let unclosed = match prior {
            Some(meta) => meta.unclosed,
            None => !doc
                .children(node)
                .any(|child| doc.kind(child) == NodeKind::ClosingElementName),
        };
        SyntheticMeta {
            tag_name,
            attributes,
            self_closing: flags.contains(NodeFlags::SELF_CLOSING)
                || prior.is_some_and(|meta| meta.self_closing),
            void: flags.contains(NodeFlags::VOID) || prior.is_some_and(|meta| meta.void),
            inner: prior.and_then(|meta| meta.inner.clone()),
            unclosed,
        }
    }

    fn wrap(&mut self, node: NodeId, op: &Operation) -> Result<(), RewriteError> {
        let Some(wrapper) = op.wrapper.clone() else {
            return self.keep(node);
        };
        match wrapper.element() {
            Some(mut meta) => {
                meta.inner = None;
                let content =
                    SyntheticContent::fragments(meta.open_tag().as_str(), meta.close_tag().as_str());
                self.out
                    .open_synthetic_element(NodeKind::Element, content, Some(meta), None);
                self.emit_all(wrapper.children());
            }
            None => {
                let (open, close) = wrapper.fragments();
                let content = SyntheticContent::fragments(open.as_str(), close.as_str());
                self.out
                    .open_synthetic_element(wrapper.kind(), content, None, None);
            }
        }
        let result = self.keep(node);
        self.out.pop()?;
        result
    }

    fn unwrap(&mut self, node: NodeId, op: &Operation) -> Result<(), RewriteError> {
        let doc = self.doc;
        if !doc.has_children(node) {
            match doc.synthetic_meta(node).and_then(|meta| meta.inner.clone()) {
                Some(inner) => {
                    self.out.add_synthetic_node(&Content::from(inner.as_str()));
                }
                // leaves other than elements have nothing to unwrap
                None if doc.kind(node) != NodeKind::Element => {
                    self.out.copy_node(node, false);
                }
                None => {}
            }
            self.emit_all(&op.prepend_children);
            self.emit_all(&op.append_children);
            return Ok(());
        }
        self.children(node, false)
    }

    fn replace_children(&mut self, node: NodeId, op: &Operation) -> Result<(), RewriteError> {
        let doc = self.doc;
        if op.has_element_edits() && doc.kind(node) == NodeKind::Element {
            let meta = self.element_meta(node, op);
            if meta.void || meta.self_closing {
                self.out.add_synthetic_element(meta, Some(node));
                self.splice(op);
                return Ok(());
            }
            let content =
                SyntheticContent::fragments(meta.open_tag().as_str(), meta.close_tag().as_str());
            self.out
                .open_synthetic_element(NodeKind::Element, content, Some(meta), Some(node));
            self.splice(op);
            self.out.pop()?;
            return Ok(());
        }

        let id = self.out.copy_node(node, true);
        self.out.push(id);
        let mut spliced = false;
        for child in doc.children(node) {
            if doc.is_opening_child(node, child) {
                self.out.copy_subtree(child);
                continue;
            }
            if !spliced {
                self.splice(op);
                spliced = true;
            }
            if doc.is_closing_child(node, child) {
                self.out.copy_subtree(child);
            }
        }
        if !spliced {
            self.splice(op);
        }
        self.out.pop()?;
        Ok(())
    }

    fn splice(&mut self, op: &Operation) {
        self.emit_all(&op.prepend_children);
        self.emit_all(&op.replacement);
        self.emit_all(&op.append_children);
    }
}

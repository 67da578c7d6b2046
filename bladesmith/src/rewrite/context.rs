//! Pending operations of one rewrite pass, keyed by node of the input tree.

use crate::content::Content;
use crate::document::{Document, canonical_name};
use compact_str::CompactString;
use indexmap::IndexMap;
use indextree::NodeId;
use std::collections::{HashMap, HashSet};

/// What happens to the node itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OperationKind {
    #[default]
    Keep,
    Remove,
    Replace,
    Wrap,
    Unwrap,
    ReplaceChildren,
}

/// A queued change to one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange {
    /// Set the value; `None` makes it a bare boolean attribute
    Set(Option<CompactString>),
    Remove,
}

/// Everything queued for one node.
///
/// `kind` is the discriminator; the other fields accumulate across calls
/// (from any visitor, in enter or leave) without overwriting each other.
#[derive(Debug, Clone, Default)]
pub struct Operation {
    pub kind: OperationKind,
    /// Used by `Replace` and `ReplaceChildren`
    pub replacement: Vec<Content>,
    /// Used by `Wrap`
    pub wrapper: Option<Content>,
    pub insert_before: Vec<Content>,
    pub insert_after: Vec<Content>,
    pub prepend_children: Vec<Content>,
    pub append_children: Vec<Content>,
    /// Canonical attribute name to change, in the order first queued
    pub attribute_changes: IndexMap<CompactString, AttributeChange>,
    pub new_tag_name: Option<CompactString>,
    /// Paired before/after fragments, innermost first
    pub wrap_stack: Vec<(Content, Content)>,
    /// Bumped on every rename or attribute change
    pub revision: u32,
}

impl Operation {
    pub fn has_element_edits(&self) -> bool {
        self.new_tag_name.is_some() || !self.attribute_changes.is_empty()
    }

    pub fn has_child_insertions(&self) -> bool {
        !self.prepend_children.is_empty() || !self.append_children.is_empty()
    }
}

/// Operation accumulator for one pass.
#[derive(Debug, Default)]
pub struct RewriteContext {
    operations: HashMap<NodeId, Operation>,
    skip_children: HashSet<NodeId>,
    stopped: bool,
}

impl RewriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(&self, node: NodeId) -> Option<&Operation> {
        self.operations.get(&node)
    }

    /// Number of nodes with something queued.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn entry(&mut self, node: NodeId) -> &mut Operation {
        self.operations.entry(node).or_default()
    }

    pub fn queue_remove(&mut self, node: NodeId) {
        self.entry(node).kind = OperationKind::Remove;
        self.mark_skip_children(node);
    }

    /// Replace the node, keeping insertions and wrap pairs queued so far.
    pub fn queue_replace(&mut self, node: NodeId, replacement: Vec<Content>) {
        let prior = self.operations.remove(&node).unwrap_or_default();
        self.operations.insert(
            node,
            Operation {
                kind: OperationKind::Replace,
                replacement,
                insert_before: prior.insert_before,
                insert_after: prior.insert_after,
                wrap_stack: prior.wrap_stack,
                ..Default::default()
            },
        );
        self.mark_skip_children(node);
    }

    pub fn queue_wrap(&mut self, node: NodeId, wrapper: Content) {
        let op = self.entry(node);
        op.kind = OperationKind::Wrap;
        op.wrapper = Some(wrapper);
    }

    pub fn queue_wrap_pair(&mut self, node: NodeId, before: Content, after: Content) {
        self.entry(node).wrap_stack.push((before, after));
    }

    pub fn queue_unwrap(&mut self, node: NodeId) {
        self.entry(node).kind = OperationKind::Unwrap;
        self.mark_skip_children(node);
    }

    pub fn queue_replace_children(&mut self, node: NodeId, children: Vec<Content>) {
        let op = self.entry(node);
        op.kind = OperationKind::ReplaceChildren;
        op.replacement = children;
    }

    pub fn queue_insert_before(&mut self, node: NodeId, content: Content) {
        self.entry(node).insert_before.push(content);
    }

    pub fn queue_insert_after(&mut self, node: NodeId, content: Content) {
        self.entry(node).insert_after.push(content);
    }

    pub fn queue_prepend_child(&mut self, node: NodeId, content: Content) {
        self.entry(node).prepend_children.push(content);
    }

    pub fn queue_append_child(&mut self, node: NodeId, content: Content) {
        self.entry(node).append_children.push(content);
    }

    pub fn queue_set_attribute(&mut self, node: NodeId, name: &str, value: Option<CompactString>) {
        let op = self.entry(node);
        op.attribute_changes
            .insert(canonical_name(name), AttributeChange::Set(value));
        op.revision += 1;
    }

    pub fn queue_remove_attribute(&mut self, node: NodeId, name: &str) {
        let op = self.entry(node);
        op.attribute_changes
            .insert(canonical_name(name), AttributeChange::Remove);
        op.revision += 1;
    }

    pub fn queue_rename(&mut self, node: NodeId, tag: impl Into<CompactString>) {
        let op = self.entry(node);
        op.new_tag_name = Some(tag.into());
        op.revision += 1;
    }

    pub fn mark_skip_children(&mut self, node: NodeId) {
        self.skip_children.insert(node);
    }

    pub fn should_skip_children(&self, node: NodeId) -> bool {
        self.skip_children.contains(&node)
    }

    /// Request that the whole pass stop.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Attribute value as of this point in the pass.
    ///
    /// A pending change wins, then the element's live attributes, then
    /// metadata carried over from a previous pass. Boolean attributes read
    /// as `""`.
    pub fn effective_attribute(
        &self,
        doc: &Document,
        node: NodeId,
        name: &str,
    ) -> Option<CompactString> {
        let name = canonical_name(name);
        if let Some(change) = self
            .operations
            .get(&node)
            .and_then(|op| op.attribute_changes.get(&name))
        {
            return match change {
                AttributeChange::Set(value) => Some(value.clone().unwrap_or_default()),
                AttributeChange::Remove => None,
            };
        }
        doc.element(node)?.attribute(&name).map(CompactString::from)
    }

    pub fn is_attribute_marked_for_removal(&self, node: NodeId, name: &str) -> bool {
        let name = canonical_name(name);
        self.operations
            .get(&node)
            .and_then(|op| op.attribute_changes.get(&name))
            .is_some_and(|change| *change == AttributeChange::Remove)
    }

    pub fn has_element_edits(&self, node: NodeId) -> bool {
        self.operations
            .get(&node)
            .is_some_and(Operation::has_element_edits)
    }

    /// Whether anything is queued strictly inside `node`'s subtree.
    pub fn has_pending_within(&self, doc: &Document, node: NodeId) -> bool {
        self.operations.keys().any(|&queued| {
            queued != node && queued.ancestors(&doc.arena).any(|ancestor| ancestor == node)
        })
    }
}

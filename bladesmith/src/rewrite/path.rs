//! The cursor handed to visitors.

use super::context::RewriteContext;
use crate::content::Content;
use crate::document::{Document, ElementView, NodeKind};
use crate::error::RewriteError;
use compact_str::CompactString;
use indextree::NodeId;

/// A node of the input tree, seen during a pass.
///
/// Reads go to the input [`Document`], which never changes during a pass.
/// Mutations are queued in the pass's [`RewriteContext`] and applied by the
/// rewriter when it gets to the node, so they never show up in reads except
/// through the attribute and class helpers, which consult queued changes.
pub struct NodePath<'a> {
    doc: &'a Document,
    ctx: &'a mut RewriteContext,
    node: NodeId,
}

impl<'a> NodePath<'a> {
    pub(crate) fn new(doc: &'a Document, ctx: &'a mut RewriteContext, node: NodeId) -> Self {
        NodePath { doc, ctx, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    pub fn kind(&self) -> NodeKind {
        self.doc.kind(self.node)
    }

    /// Parent node, `None` at root level.
    pub fn parent(&self) -> Option<NodeId> {
        self.doc
            .parent(self.node)
            .filter(|&parent| parent != self.doc.root())
    }

    /// A path to the parent, sharing this pass's queue.
    pub fn parent_path(&mut self) -> Option<NodePath<'_>> {
        let parent = self.parent()?;
        Some(NodePath {
            doc: self.doc,
            ctx: &mut *self.ctx,
            node: parent,
        })
    }

    fn content_siblings(&self) -> Vec<NodeId> {
        match self.parent() {
            Some(parent) => self.doc.content_children(parent).collect(),
            None => self.doc.root_children().collect(),
        }
    }

    /// Position among the parent's content children, `None` at root level.
    pub fn index_in_parent(&self) -> Option<usize> {
        self.parent()?;
        self.content_siblings()
            .iter()
            .position(|&sibling| sibling == self.node)
    }

    /// Number of ancestors below the document root.
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// The other content children of this node's parent.
    pub fn siblings(&self) -> Vec<NodeId> {
        let mut siblings = self.content_siblings();
        siblings.retain(|&sibling| sibling != self.node);
        siblings
    }

    pub fn previous_sibling(&self) -> Option<NodeId> {
        let siblings = self.content_siblings();
        let index = siblings.iter().position(|&sibling| sibling == self.node)?;
        index.checked_sub(1).map(|previous| siblings[previous])
    }

    pub fn next_sibling(&self) -> Option<NodeId> {
        let siblings = self.content_siblings();
        let index = siblings.iter().position(|&sibling| sibling == self.node)?;
        siblings.get(index + 1).copied()
    }

    /// Ancestors, nearest first, excluding the document root.
    pub fn ancestors(&self) -> impl Iterator<Item = NodeId> + 'a {
        let doc = self.doc;
        self.node
            .ancestors(&doc.arena)
            .skip(1)
            .filter(move |&ancestor| ancestor != doc.root())
    }

    pub fn find_ancestor(&self, mut predicate: impl FnMut(&Document, NodeId) -> bool) -> Option<NodeId> {
        let doc = self.doc;
        self.ancestors().find(|&ancestor| predicate(doc, ancestor))
    }

    pub fn is_element(&self) -> bool {
        self.kind() == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.kind() == NodeKind::Text
    }

    pub fn is_echo(&self) -> bool {
        self.kind() == NodeKind::Echo
    }

    pub fn is_comment(&self) -> bool {
        self.kind() == NodeKind::Comment
    }

    pub fn is_directive(&self) -> bool {
        matches!(self.kind(), NodeKind::Directive | NodeKind::DirectiveBlock)
    }

    pub fn as_element(&self) -> Option<ElementView<'a>> {
        self.doc.element(self.node)
    }

    /// Tag name, taking a queued rename into account.
    pub fn tag_name(&self) -> Option<CompactString> {
        let element = self.as_element()?;
        let renamed = self
            .ctx
            .operation(self.node)
            .and_then(|op| op.new_tag_name.clone());
        Some(renamed.unwrap_or_else(|| CompactString::from(element.tag_name())))
    }

    /// Case-insensitive tag test, ignoring generic arguments.
    pub fn is_tag(&self, name: &str) -> bool {
        self.tag_name()
            .is_some_and(|tag| tag.eq_ignore_ascii_case(name))
    }

    /// A directive, or a directive block opened by `name`.
    pub fn is_directive_named(&self, name: &str) -> bool {
        let directive = match self.kind() {
            NodeKind::Directive => self.node,
            NodeKind::DirectiveBlock => match self.doc.children(self.node).next() {
                Some(opener) => opener,
                None => return false,
            },
            _ => return false,
        };
        self.doc.get(directive).name.as_deref() == Some(name)
    }

    /// Source (or stored synthetic) text of the node.
    pub fn text(&self) -> Option<&'a str> {
        self.doc.text(self.node)
    }

    // --- structural mutations ---------------------------------------------

    pub fn replace_with(&mut self, content: impl Into<Content>) -> &mut Self {
        self.ctx.queue_replace(self.node, vec![content.into()]);
        self
    }

    pub fn replace_with_many(&mut self, contents: impl IntoIterator<Item = Content>) -> &mut Self {
        self.ctx
            .queue_replace(self.node, contents.into_iter().collect());
        self
    }

    pub fn remove(&mut self) -> &mut Self {
        self.ctx.queue_remove(self.node);
        self
    }

    pub fn insert_before(&mut self, content: impl Into<Content>) -> &mut Self {
        self.ctx.queue_insert_before(self.node, content.into());
        self
    }

    pub fn insert_after(&mut self, content: impl Into<Content>) -> &mut Self {
        self.ctx.queue_insert_after(self.node, content.into());
        self
    }

    /// Wrap the node in `wrapper`; element-shaped wrappers put their own
    /// children before the node.
    pub fn wrap_with(&mut self, wrapper: impl Into<Content>) -> &mut Self {
        self.ctx.queue_wrap(self.node, wrapper.into());
        self
    }

    /// Emit `before` and `after` around the node. Pairs nest: later calls
    /// end up outside earlier ones.
    pub fn wrap_in(&mut self, before: impl Into<Content>, after: impl Into<Content>) -> &mut Self {
        self.ctx
            .queue_wrap_pair(self.node, before.into(), after.into());
        self
    }

    /// Drop the node's own markup and keep its content in place.
    pub fn unwrap(&mut self) -> &mut Self {
        self.ctx.queue_unwrap(self.node);
        self
    }

    pub fn replace_children(&mut self, children: impl IntoIterator<Item = Content>) -> &mut Self {
        self.ctx
            .queue_replace_children(self.node, children.into_iter().collect());
        self
    }

    pub fn prepend_child(&mut self, content: impl Into<Content>) -> &mut Self {
        self.ctx.queue_prepend_child(self.node, content.into());
        self
    }

    pub fn prepend_children(&mut self, contents: impl IntoIterator<Item = Content>) -> &mut Self {
        for content in contents {
            self.ctx.queue_prepend_child(self.node, content);
        }
        self
    }

    pub fn append_child(&mut self, content: impl Into<Content>) -> &mut Self {
        self.ctx.queue_append_child(self.node, content.into());
        self
    }

    pub fn surround_with(
        &mut self,
        before: impl Into<Content>,
        replacement: impl Into<Content>,
        after: impl Into<Content>,
    ) -> &mut Self {
        self.insert_before(before)
            .replace_with(replacement)
            .insert_after(after)
    }

    /// Like `insert_before` / `insert_after`, except that content goes
    /// inside the node when it is the only root-level element.
    pub fn safe_surround(&mut self, start: impl Into<Content>, end: Option<Content>) -> &mut Self {
        if self.is_sole_root_element() {
            self.prepend_child(start);
            if let Some(end) = end {
                self.append_child(end);
            }
        } else {
            self.insert_before(start);
            if let Some(end) = end {
                self.insert_after(end);
            }
        }
        self
    }

    fn is_sole_root_element(&self) -> bool {
        self.parent().is_none() && self.is_element() && self.doc.root_elements().count() == 1
    }

    /// Do not descend into this node's children.
    pub fn skip_children(&mut self) -> &mut Self {
        self.ctx.mark_skip_children(self.node);
        self
    }

    /// Stop the whole pass after the current callback.
    pub fn stop(&mut self) -> &mut Self {
        self.ctx.stop();
        self
    }

    pub fn context(&mut self) -> &mut RewriteContext {
        &mut *self.ctx
    }

    // --- element operations -----------------------------------------------

    fn require_element(&self, operation: &str) -> Result<(), RewriteError> {
        if self.is_element() {
            Ok(())
        } else {
            Err(RewriteError::not_an_element(operation, self.kind()))
        }
    }

    pub fn set_attribute(
        &mut self,
        name: &str,
        value: impl Into<CompactString>,
    ) -> Result<&mut Self, RewriteError> {
        self.require_element("set_attribute")?;
        self.ctx
            .queue_set_attribute(self.node, name, Some(value.into()));
        Ok(self)
    }

    /// Set a valueless attribute such as `disabled`.
    pub fn set_boolean_attribute(&mut self, name: &str) -> Result<&mut Self, RewriteError> {
        self.require_element("set_boolean_attribute")?;
        self.ctx.queue_set_attribute(self.node, name, None);
        Ok(self)
    }

    pub fn remove_attribute(&mut self, name: &str) -> Result<&mut Self, RewriteError> {
        self.require_element("remove_attribute")?;
        self.ctx.queue_remove_attribute(self.node, name);
        Ok(self)
    }

    pub fn rename_tag(&mut self, tag: impl Into<CompactString>) -> Result<&mut Self, RewriteError> {
        self.require_element("rename_tag")?;
        self.ctx.queue_rename(self.node, tag);
        Ok(self)
    }

    pub fn get_attribute(&self, name: &str) -> Result<Option<CompactString>, RewriteError> {
        self.require_element("get_attribute")?;
        Ok(self.ctx.effective_attribute(self.doc, self.node, name))
    }

    pub fn has_attribute(&self, name: &str) -> Result<bool, RewriteError> {
        self.require_element("has_attribute")?;
        Ok(self
            .ctx
            .effective_attribute(self.doc, self.node, name)
            .is_some())
    }

    pub fn get_classes(&self) -> Result<Vec<CompactString>, RewriteError> {
        self.require_element("get_classes")?;
        Ok(self.classes())
    }

    pub fn has_class(&self, class: &str) -> Result<bool, RewriteError> {
        self.require_element("has_class")?;
        Ok(self.classes().iter().any(|existing| existing == class))
    }

    pub fn add_class(&mut self, class: &str) -> Result<&mut Self, RewriteError> {
        self.require_element("add_class")?;
        let mut classes = self.classes();
        if !classes.iter().any(|existing| existing == class) {
            classes.push(CompactString::from(class));
            self.write_classes(&classes);
        }
        Ok(self)
    }

    pub fn remove_class(&mut self, class: &str) -> Result<&mut Self, RewriteError> {
        self.require_element("remove_class")?;
        let mut classes = self.classes();
        let before = classes.len();
        classes.retain(|existing| existing != class);
        if classes.len() != before {
            self.write_classes(&classes);
        }
        Ok(self)
    }

    pub fn toggle_class(&mut self, class: &str) -> Result<&mut Self, RewriteError> {
        if self.has_class(class)? {
            self.remove_class(class)
        } else {
            self.add_class(class)
        }
    }

    fn classes(&self) -> Vec<CompactString> {
        self.ctx
            .effective_attribute(self.doc, self.node, "class")
            .map(|value| value.split_ascii_whitespace().map(CompactString::from).collect())
            .unwrap_or_default()
    }

    // An empty list drops the attribute rather than leaving `class=""`.
    fn write_classes(&mut self, classes: &[CompactString]) {
        if classes.is_empty() {
            self.ctx.queue_remove_attribute(self.node, "class");
        } else {
            let value = classes.join(" ");
            self.ctx
                .queue_set_attribute(self.node, "class", Some(value.into()));
        }
    }
}

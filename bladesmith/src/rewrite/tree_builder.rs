//! Incremental assembly of the output Document.
//!
//! Nodes are appended under the top of a parent stack. Copied nodes keep
//! their token range and keep pointing into the shared source; synthetic
//! nodes get side-table entries instead. When a copied node is popped, its
//! new children are compared with its old ones: if anything changed, the node
//! is flagged for composition so it renders from its children rather than
//! from its (now stale) token slice.

use crate::content::Content;
use crate::document::{Document, FlatNode, NodeFlags, NodeKind, SyntheticContent, SyntheticMeta};
use crate::error::RewriteError;
use indextree::{Arena, NodeId};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Where content lands inside an emitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPosition {
    First,
    Last,
}

pub struct DocumentBuilder<'d> {
    old: &'d Document,
    arena: Arena<FlatNode>,
    root: NodeId,
    stack: SmallVec<[NodeId; 16]>,
    synthetic_content: HashMap<NodeId, SyntheticContent>,
    synthetic_meta: HashMap<NodeId, SyntheticMeta>,
    /// old node -> its emitted counterpart
    emitted: HashMap<NodeId, NodeId>,
    /// new node -> the old node it was copied from
    origin: HashMap<NodeId, NodeId>,
}

impl<'d> DocumentBuilder<'d> {
    pub fn new(old: &'d Document) -> Self {
        let mut arena = Arena::with_capacity(old.arena.count());
        let root = arena.new_node(old.get(old.root()).clone());
        let mut stack = SmallVec::new();
        stack.push(root);
        DocumentBuilder {
            old,
            arena,
            root,
            stack,
            synthetic_content: HashMap::new(),
            synthetic_meta: HashMap::new(),
            emitted: HashMap::new(),
            origin: HashMap::new(),
        }
    }

    /// Node new children are appended to.
    pub fn current(&self) -> NodeId {
        self.stack.last().copied().unwrap_or(self.root)
    }

    /// Open nodes below the root.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// The emitted counterpart of an input node.
    pub fn emitted(&self, old: NodeId) -> Option<NodeId> {
        self.emitted.get(&old).copied()
    }

    fn append(&mut self, node: FlatNode) -> NodeId {
        let id = self.arena.new_node(node);
        let parent = self.current();
        parent.append(id, &mut self.arena);
        id
    }

    fn register(&mut self, old: NodeId, new: NodeId) {
        self.emitted.insert(old, new);
        self.origin.insert(new, old);
    }

    /// Copy one node (without its children) under the current parent.
    pub fn copy_node(&mut self, old: NodeId, composed: bool) -> NodeId {
        let mut node = self.old.get(old).clone();
        if composed {
            node.flags.insert(NodeFlags::NEEDS_COMPOSITION);
        }
        let id = self.append(node);
        if let Some(content) = self.old.synthetic_content(old) {
            self.synthetic_content.insert(id, content.clone());
        }
        if let Some(meta) = self.old.synthetic_meta(old) {
            self.synthetic_meta.insert(id, meta.clone());
        }
        self.register(old, id);
        id
    }

    /// Copy a node and everything below it, unchanged.
    pub fn copy_subtree(&mut self, old: NodeId) -> NodeId {
        let id = self.copy_node(old, false);
        let old_doc = self.old;
        self.stack.push(id);
        for child in old_doc.children(old) {
            self.copy_subtree(child);
        }
        self.stack.pop();
        id
    }

    /// Materialize content as one synthetic leaf.
    pub fn add_synthetic_node(&mut self, content: &Content) -> NodeId {
        let parent = self.current();
        self.place_synthetic(content, parent, None)
    }

    /// Materialize content inside a node that was already emitted.
    ///
    /// `First` puts it right after the opening markup, `Last` right before
    /// the closing markup. The node renders from its children from now on.
    pub fn insert_synthetic_children(
        &mut self,
        parent: NodeId,
        contents: &[Content],
        position: ChildPosition,
    ) {
        if contents.is_empty() {
            return;
        }
        self.open_leaf(parent);
        let anchor = match position {
            ChildPosition::First => self.first_non_opening_child(parent),
            ChildPosition::Last => self.closing_child(parent),
        };
        for content in contents {
            self.place_synthetic(content, parent, anchor);
        }
        let node = self.arena[parent].get_mut();
        if node.tokens.is_some() {
            node.flags.insert(NodeFlags::NEEDS_COMPOSITION);
        }
    }

    /// Materialize content right before an emitted sibling.
    pub fn insert_synthetic_before(&mut self, sibling: NodeId, contents: &[Content]) {
        let Some(parent) = self.arena[sibling].parent() else {
            return;
        };
        for content in contents {
            self.place_synthetic(content, parent, Some(sibling));
        }
    }

    /// Parent of an emitted node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    fn place_synthetic(&mut self, content: &Content, parent: NodeId, before: Option<NodeId>) -> NodeId {
        let preceding = match before {
            Some(anchor) => self.arena[anchor].previous_sibling(),
            None => self.arena[parent].last_child(),
        };
        let mut text = content.render();
        if content.needs_leading_separator()
            && self.last_char_from(preceding, true).is_some_and(is_word_char)
        {
            text.insert(0, ' ');
        }

        let mut node = FlatNode::new(content.kind());
        if let Some((name, args)) = content.directive() {
            node.name = Some(name.into());
            node.args = args.map(Into::into);
        }
        let meta = content.element();
        if let Some(meta) = &meta {
            set_element_flags(&mut node.flags, meta);
        }

        let id = self.arena.new_node(node);
        match before {
            Some(anchor) => anchor.insert_before(id, &mut self.arena),
            None => parent.append(id, &mut self.arena),
        }
        self.synthetic_content
            .insert(id, SyntheticContent::leaf(text.as_str()));
        if let Some(meta) = meta {
            self.synthetic_meta.insert(id, meta);
        }
        trace!(?id, kind = ?content.kind(), "synthetic node");
        id
    }

    // A synthetic element leaf is split into fragments before it takes children.
    fn open_leaf(&mut self, id: NodeId) {
        let Some(meta) = self.synthetic_meta.get(&id) else {
            return;
        };
        let leaf = self
            .synthetic_content
            .get(&id)
            .is_some_and(|content| content.closing.is_none());
        if !leaf || meta.void || meta.self_closing {
            return;
        }
        let mut open = meta.open_tag();
        if let Some(inner) = &meta.inner {
            open.push_str(inner);
        }
        let content = SyntheticContent::fragments(open.as_str(), meta.close_tag().as_str());
        self.synthetic_content.insert(id, content);
    }

    fn first_non_opening_child(&self, parent: NodeId) -> Option<NodeId> {
        let kind = self.arena[parent].get().kind;
        let mut children = parent.children(&self.arena).peekable();
        if kind == NodeKind::DirectiveBlock
            && children
                .peek()
                .is_some_and(|&opener| self.arena[opener].get().kind == NodeKind::Directive)
        {
            children.next();
        }
        children.find(|&child| {
            let child_kind = self.arena[child].get().kind;
            kind != NodeKind::Element
                || !child_kind.is_tag_markup()
                || child_kind == NodeKind::ClosingElementName
        })
    }

    fn closing_child(&self, parent: NodeId) -> Option<NodeId> {
        let last = self.arena[parent].last_child()?;
        let node = self.arena[last].get();
        let closing = match self.arena[parent].get().kind {
            NodeKind::Element => node.kind == NodeKind::ClosingElementName,
            NodeKind::DirectiveBlock => {
                node.kind == NodeKind::Directive
                    && self.arena[parent].first_child() != Some(last)
                    && node.name.as_deref().is_some_and(|name| name.starts_with("end"))
            }
            _ => false,
        };
        closing.then_some(last)
    }

    /// A rebuilt element emitted as a single leaf.
    pub fn add_synthetic_element(&mut self, meta: SyntheticMeta, origin: Option<NodeId>) -> NodeId {
        let mut node = FlatNode::new(NodeKind::Element);
        set_element_flags(&mut node.flags, &meta);
        let id = self.append(node);
        self.synthetic_content
            .insert(id, SyntheticContent::leaf(meta.render_leaf().as_str()));
        self.synthetic_meta.insert(id, meta);
        if let Some(old) = origin {
            self.emitted.insert(old, id);
        }
        id
    }

    /// A synthetic node rendered as `content.text`, children, `content.closing`.
    /// Becomes the current parent until the matching [`pop`](Self::pop).
    pub fn open_synthetic_element(
        &mut self,
        kind: NodeKind,
        content: SyntheticContent,
        meta: Option<SyntheticMeta>,
        origin: Option<NodeId>,
    ) -> NodeId {
        let mut node = FlatNode::new(kind);
        if let Some(meta) = &meta {
            set_element_flags(&mut node.flags, meta);
        }
        let id = self.append(node);
        self.synthetic_content.insert(id, content);
        if let Some(meta) = meta {
            self.synthetic_meta.insert(id, meta);
        }
        if let Some(old) = origin {
            self.emitted.insert(old, id);
        }
        self.stack.push(id);
        id
    }

    /// Replace the tag of an element that was already emitted.
    ///
    /// Opening and closing markup children are dropped; the tag comes from
    /// `meta` from now on, and content children are kept.
    pub fn patch_element_meta(&mut self, id: NodeId, meta: SyntheticMeta) {
        let markup: Vec<NodeId> = id
            .children(&self.arena)
            .filter(|&child| self.arena[child].get().kind.is_tag_markup())
            .collect();
        for child in markup {
            child.remove_subtree(&mut self.arena);
        }

        let has_children = self.arena[id].first_child().is_some();
        let content = if has_children {
            let mut open = meta.open_tag();
            if let Some(inner) = &meta.inner {
                open.push_str(inner);
            }
            SyntheticContent::fragments(open.as_str(), meta.close_tag().as_str())
        } else {
            SyntheticContent::leaf(meta.render_leaf().as_str())
        };

        let node = self.arena[id].get_mut();
        node.tokens = None;
        node.flags.remove(NodeFlags::NEEDS_COMPOSITION);
        set_element_flags(&mut node.flags, &meta);
        self.synthetic_content.insert(id, content);
        self.synthetic_meta.insert(id, meta);
        debug!(?id, "patched element tag");
    }

    pub fn push(&mut self, id: NodeId) {
        self.stack.push(id);
    }

    /// Close the current parent.
    pub fn pop(&mut self) -> Result<NodeId, RewriteError> {
        if self.stack.len() <= 1 {
            return Err(RewriteError::PopPastRoot);
        }
        let id = self.stack.pop().ok_or(RewriteError::PopPastRoot)?;
        self.settle_composition(id);
        Ok(id)
    }

    fn settle_composition(&mut self, id: NodeId) {
        let node = self.arena[id].get();
        if node.tokens.is_none() || node.needs_composition() {
            return;
        }
        let Some(&old) = self.origin.get(&id) else {
            return;
        };
        let mut new_children = id.children(&self.arena);
        let mut old_children = self.old.children(old);
        let intact = loop {
            match (new_children.next(), old_children.next()) {
                (None, None) => break true,
                (Some(new), Some(old)) => {
                    let child = self.arena[new].get();
                    let verbatim = child.tokens.is_some() && !child.needs_composition();
                    if !verbatim || self.origin.get(&new) != Some(&old) {
                        break false;
                    }
                }
                _ => break false,
            }
        };
        if !intact {
            self.arena[id]
                .get_mut()
                .flags
                .insert(NodeFlags::NEEDS_COMPOSITION);
        }
    }

    /// Last rendered character of `child` or the siblings before it.
    fn last_char_from(&self, mut child: Option<NodeId>, skip_markup: bool) -> Option<char> {
        while let Some(id) = child {
            child = self.arena[id].previous_sibling();
            if skip_markup && self.arena[id].get().kind.is_tag_markup() {
                continue;
            }
            if let Some(last) = self.last_char(id) {
                return Some(last);
            }
        }
        None
    }

    fn last_char(&self, id: NodeId) -> Option<char> {
        let node = self.arena[id].get();
        let last_child = self.arena[id].last_child();
        match node.tokens {
            Some(range) if node.kind != NodeKind::Root && !node.needs_composition() => {
                self.old.slice(range).chars().next_back()
            }
            Some(_) => self.last_char_from(last_child, false),
            None => {
                let content = self.synthetic_content.get(&id);
                content
                    .and_then(|content| content.closing.as_ref())
                    .and_then(|closing| closing.chars().next_back())
                    .or_else(|| self.last_char_from(last_child, false))
                    .or_else(|| content.and_then(|content| content.text.chars().next_back()))
            }
        }
    }

    /// Close anything still open and produce the Document.
    pub fn finish(mut self) -> Document {
        while self.stack.len() > 1 {
            if let Some(id) = self.stack.pop() {
                self.settle_composition(id);
            }
        }
        let old = self.old;
        Document {
            arena: self.arena,
            root: self.root,
            source: old.source.clone(),
            tokens: old.tokens.clone(),
            registries: old.registries.clone(),
            synthetic_content: self.synthetic_content,
            synthetic_meta: self.synthetic_meta,
        }
    }
}

fn set_element_flags(flags: &mut NodeFlags, meta: &SyntheticMeta) {
    if meta.self_closing {
        flags.insert(NodeFlags::SELF_CLOSING);
    }
    if meta.void {
        flags.insert(NodeFlags::VOID);
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

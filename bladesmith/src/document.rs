//! Flat, immutable parse tree.
//!
//! A [`Document`] is an indextree arena of [`FlatNode`]s plus the storage they
//! point into:
//! - **Source and tokens**: shared (`Arc`) between every Document derived
//!   from the same parse, so copied nodes keep referencing the original bytes
//! - **Synthetic side tables**: text and element metadata for nodes that were
//!   created by a rewrite pass and have no token range
//!
//! Children of an element tile the element's token range exactly: the
//! opening-tag markup (`<div`, attributes, whitespace, `>`), the content and
//! the closing tag are all child nodes. Rendering a node therefore either
//! copies its token slice verbatim or concatenates its children, and both
//! produce the same bytes for an untouched subtree.

use compact_str::CompactString;
use facet::Facet;
use indextree::{Arena, NodeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tag discriminator for a flat node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum NodeKind {
    /// Document root, parent of every root-level node
    Root,
    /// HTML element or component tag
    Element,
    /// Plain text
    Text,
    /// `@name(args)` directive
    Directive,
    /// Directive pair `@name ... @endname` with the content in between
    DirectiveBlock,
    /// `{{ expr }}` or `{!! expr !!}`
    Echo,
    /// HTML or template comment
    Comment,
    /// `@php ... @endphp`
    PhpBlock,
    /// `<?php ... ?>` or `<?= ... ?>`
    PhpTag,
    /// `<name` at the start of an opening tag
    ElementName,
    /// `</name>`
    ClosingElementName,
    /// One attribute, with name and optional value children
    Attribute,
    /// Attribute name as written (may be bound syntax like `:class`)
    AttributeName,
    /// `="value"` part of an attribute
    AttributeValue,
    /// Whitespace between attributes inside an opening tag
    AttributeWhitespace,
    /// `>` or `/>` closing an opening tag
    TagEnd,
}

impl NodeKind {
    /// Structural pieces of a tag. None of these represent rendered content.
    pub fn is_tag_markup(self) -> bool {
        matches!(
            self,
            NodeKind::ElementName
                | NodeKind::ClosingElementName
                | NodeKind::Attribute
                | NodeKind::AttributeName
                | NodeKind::AttributeValue
                | NodeKind::AttributeWhitespace
                | NodeKind::TagEnd
        )
    }
}

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum TokenKind {
    Text,
    Comment,
    Echo,
    RawEcho,
    Directive,
    PhpTag,
    PhpBlock,
    TagOpen,
    Whitespace,
    AttributeName,
    AttributeValue,
    TagEnd,
    ClosingTag,
}

/// A token: kind plus byte range in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: u32,
    pub end: u32,
}

/// Range of tokens covered by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRange {
    pub start: u32,
    pub len: u32,
}

bitflags::bitflags! {
    /// Per-node flag bits (the node's opaque data slot).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        const SELF_CLOSING = 1;
        const VOID = 1 << 1;
        /// Render from children instead of the token slice.
        const NEEDS_COMPOSITION = 1 << 2;
    }
}

/// One entry of the node table. Links live in the arena node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatNode {
    pub kind: NodeKind,
    /// `None` for synthetic nodes, whose text lives in the side tables
    pub tokens: Option<TokenRange>,
    /// Byte offset of a generic argument list inside an element's raw name
    pub generic_offset: Option<u32>,
    pub flags: NodeFlags,
    /// Directive name
    pub name: Option<CompactString>,
    /// Directive arguments, without the surrounding parentheses
    pub args: Option<CompactString>,
}

impl FlatNode {
    pub fn new(kind: NodeKind) -> Self {
        FlatNode {
            kind,
            tokens: None,
            generic_offset: None,
            flags: NodeFlags::empty(),
            name: None,
            args: None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.tokens.is_none()
    }

    pub fn needs_composition(&self) -> bool {
        self.flags.contains(NodeFlags::NEEDS_COMPOSITION)
    }
}

/// An attribute of a synthetic element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticAttribute {
    /// Canonical (lowercase) name used for lookups
    pub name: CompactString,
    /// `None` renders a bare boolean attribute
    pub value: Option<CompactString>,
    /// Verbatim source spelling, kept for attributes carried through unchanged
    pub raw: Option<CompactString>,
}

impl SyntheticAttribute {
    pub fn new(name: impl Into<CompactString>, value: Option<CompactString>) -> Self {
        SyntheticAttribute {
            name: canonical_name(&name.into()),
            value,
            raw: None,
        }
    }

    fn write_to(&self, out: &mut String) {
        if let Some(raw) = &self.raw {
            out.push_str(raw);
            return;
        }
        out.push_str(&self.name);
        if let Some(value) = &self.value {
            out.push_str("=\"");
            escape_attribute_value(value, out);
            out.push('"');
        }
    }
}

/// Structured description of a synthetic element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticMeta {
    pub tag_name: CompactString,
    pub attributes: Vec<SyntheticAttribute>,
    pub self_closing: bool,
    pub void: bool,
    /// Baked child text of a leaf synthetic element
    pub inner: Option<CompactString>,
    /// The source element had no closing tag, so none is rendered
    pub unclosed: bool,
}

impl SyntheticMeta {
    pub fn attribute(&self, name: &str) -> Option<&SyntheticAttribute> {
        let name = canonical_name(name);
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn open_tag(&self) -> String {
        let mut out = String::with_capacity(self.tag_name.len() + 2);
        out.push('<');
        out.push_str(&self.tag_name);
        for attr in &self.attributes {
            out.push(' ');
            attr.write_to(&mut out);
        }
        if self.self_closing {
            out.push_str(" />");
        } else {
            out.push('>');
        }
        out
    }

    pub fn close_tag(&self) -> String {
        if self.self_closing || self.void || self.unclosed {
            return String::new();
        }
        format!("</{}>", self.tag_name)
    }

    /// The whole element as a single fragment.
    pub fn render_leaf(&self) -> String {
        let mut out = self.open_tag();
        if let Some(inner) = &self.inner {
            out.push_str(inner);
        }
        out.push_str(&self.close_tag());
        out
    }
}

/// Rendered text of a synthetic node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticContent {
    /// Full text of a leaf, or the opening fragment of a node with children
    pub text: CompactString,
    pub closing: Option<CompactString>,
}

impl SyntheticContent {
    pub fn leaf(text: impl Into<CompactString>) -> Self {
        SyntheticContent {
            text: text.into(),
            closing: None,
        }
    }

    pub fn fragments(open: impl Into<CompactString>, close: impl Into<CompactString>) -> Self {
        SyntheticContent {
            text: open.into(),
            closing: Some(close.into()),
        }
    }
}

/// Directive and component name registries, carried through every Document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registries {
    block_directives: Vec<CompactString>,
    component_prefixes: Vec<CompactString>,
}

const DEFAULT_BLOCK_DIRECTIVES: &[&str] = &[
    "if", "unless", "isset", "empty", "auth", "guest", "env", "production", "for", "foreach",
    "forelse", "while", "switch", "section", "push", "prepend", "once", "component", "slot",
    "can", "cannot", "error", "fragment",
];

impl Default for Registries {
    fn default() -> Self {
        Registries {
            block_directives: DEFAULT_BLOCK_DIRECTIVES
                .iter()
                .map(|name| CompactString::from(*name))
                .collect(),
            component_prefixes: vec![CompactString::from("x-")],
        }
    }
}

impl Registries {
    /// Registries that know no block directives and no components.
    pub fn empty() -> Self {
        Registries {
            block_directives: Vec::new(),
            component_prefixes: Vec::new(),
        }
    }

    pub fn with_block_directive(mut self, name: impl Into<CompactString>) -> Self {
        self.block_directives.push(name.into());
        self
    }

    pub fn with_component_prefix(mut self, prefix: impl Into<CompactString>) -> Self {
        self.component_prefixes.push(prefix.into());
        self
    }

    pub fn is_block_directive(&self, name: &str) -> bool {
        self.block_directives.iter().any(|known| known == name)
    }

    pub fn is_component(&self, tag: &str) -> bool {
        self.component_prefixes
            .iter()
            .any(|prefix| tag.starts_with(prefix.as_str()))
    }
}

/// A live attribute of a parsed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeView<'a> {
    pub id: NodeId,
    /// Name as written
    pub name: &'a str,
    /// Unquoted value, `None` for boolean attributes
    pub value: Option<&'a str>,
    /// The whole attribute as written
    pub raw: &'a str,
}

/// Immutable parse tree.
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) arena: Arena<FlatNode>,
    pub(crate) root: NodeId,
    pub(crate) source: Arc<str>,
    pub(crate) tokens: Arc<[Token]>,
    pub(crate) registries: Arc<Registries>,
    pub(crate) synthetic_content: HashMap<NodeId, SyntheticContent>,
    pub(crate) synthetic_meta: HashMap<NodeId, SyntheticMeta>,
}

impl Document {
    /// Parse with default options.
    pub fn parse(source: &str) -> Document {
        crate::parser::parse(source)
    }

    pub fn parse_with(source: &str, options: &crate::ParseOptions) -> Document {
        crate::parser::parse_with(source, options)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Flat entry for `id`.
    pub fn get(&self, id: NodeId) -> &FlatNode {
        self.arena[id].get()
    }

    /// Arena node for `id`, exposing the raw link fields.
    pub fn get_node(&self, id: NodeId) -> &indextree::Node<FlatNode> {
        &self.arena[id]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.get(id).kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    pub fn root_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children(self.root)
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.arena[id].first_child().is_some()
    }

    pub fn sibling_before(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].previous_sibling()
    }

    pub fn sibling_after(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].next_sibling()
    }

    /// Number of nodes reachable from the root, root included.
    pub fn node_count(&self) -> usize {
        self.root.descendants(&self.arena).count()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn synthetic_content(&self, id: NodeId) -> Option<&SyntheticContent> {
        self.synthetic_content.get(&id)
    }

    pub fn synthetic_meta(&self, id: NodeId) -> Option<&SyntheticMeta> {
        self.synthetic_meta.get(&id)
    }

    /// Source text for a token range.
    pub fn slice(&self, range: TokenRange) -> &str {
        if range.len == 0 {
            return "";
        }
        let first = &self.tokens[range.start as usize];
        let last = &self.tokens[(range.start + range.len - 1) as usize];
        &self.source[first.start as usize..last.end as usize]
    }

    /// Verbatim source text of a node, or the stored text of a synthetic node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.get(id).tokens {
            Some(range) => Some(self.slice(range)),
            None => self.synthetic_content(id).map(|content| content.text.as_str()),
        }
    }

    pub fn element(&self, id: NodeId) -> Option<ElementView<'_>> {
        (self.kind(id) == NodeKind::Element).then_some(ElementView { doc: self, id })
    }

    /// Root-level element nodes.
    pub fn root_elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.root_children()
            .filter(|&id| self.kind(id) == NodeKind::Element)
    }

    /// Live attributes of a parsed element, in source order.
    pub fn attributes(&self, id: NodeId) -> Vec<AttributeView<'_>> {
        self.children(id)
            .filter(|&child| self.kind(child) == NodeKind::Attribute)
            .filter_map(|attr| self.attribute_view(attr))
            .collect()
    }

    fn attribute_view(&self, attr: NodeId) -> Option<AttributeView<'_>> {
        let raw = self.text(attr)?;
        let mut name = raw;
        let mut value = None;
        for part in self.children(attr) {
            match self.kind(part) {
                NodeKind::AttributeName => name = self.text(part).unwrap_or_default(),
                NodeKind::AttributeValue => {
                    value = self.text(part).map(unquote_attribute_value);
                }
                _ => {}
            }
        }
        Some(AttributeView {
            id: attr,
            name,
            value,
            raw,
        })
    }

    /// First child that opens the node's own markup (tag pieces, block opener).
    pub fn is_opening_child(&self, parent: NodeId, child: NodeId) -> bool {
        let kind = self.kind(child);
        match self.kind(parent) {
            NodeKind::Element => kind.is_tag_markup() && kind != NodeKind::ClosingElementName,
            NodeKind::DirectiveBlock => {
                kind == NodeKind::Directive && self.arena[parent].first_child() == Some(child)
            }
            _ => false,
        }
    }

    /// Closing markup: `</name>` or the `@end...` directive of a block.
    pub fn is_closing_child(&self, parent: NodeId, child: NodeId) -> bool {
        let node = self.get(child);
        match self.kind(parent) {
            NodeKind::Element => node.kind == NodeKind::ClosingElementName,
            NodeKind::DirectiveBlock => {
                node.kind == NodeKind::Directive
                    && self.arena[parent].last_child() == Some(child)
                    && self.arena[parent].first_child() != Some(child)
                    && node
                        .name
                        .as_deref()
                        .is_some_and(|name| name.starts_with("end"))
            }
            _ => false,
        }
    }

    /// Children that are content rather than the node's own markup.
    pub fn content_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).filter(move |&child| {
            !self.is_opening_child(id, child) && !self.is_closing_child(id, child)
        })
    }

    /// Render the whole document.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.source.len());
        self.write_node(self.root, &mut out);
        out
    }

    /// Render one node and its subtree.
    pub fn render_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = self.get(id);
        match node.tokens {
            Some(range) if node.kind != NodeKind::Root && !node.needs_composition() => {
                out.push_str(self.slice(range));
            }
            Some(_) => {
                for child in self.children(id) {
                    self.write_node(child, out);
                }
            }
            None => {
                let content = self.synthetic_content(id);
                if let Some(content) = content {
                    out.push_str(&content.text);
                }
                for child in self.children(id) {
                    self.write_node(child, out);
                }
                if let Some(closing) = content.and_then(|content| content.closing.as_ref()) {
                    out.push_str(closing);
                }
            }
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Read-only view of an element node, live or synthetic.
#[derive(Debug, Clone, Copy)]
pub struct ElementView<'a> {
    doc: &'a Document,
    id: NodeId,
}

impl<'a> ElementView<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Tag name as written, generic arguments included.
    pub fn raw_name(&self) -> &'a str {
        if let Some(meta) = self.doc.synthetic_meta(self.id) {
            return meta.tag_name.as_str();
        }
        self.doc
            .children(self.id)
            .find(|&child| self.doc.kind(child) == NodeKind::ElementName)
            .and_then(|name| self.doc.text(name))
            .map(|text| text.trim_start_matches('<'))
            .unwrap_or_default()
    }

    /// Tag name without generic arguments.
    pub fn tag_name(&self) -> &'a str {
        let raw = self.raw_name();
        match self.doc.get(self.id).generic_offset {
            Some(offset) if (offset as usize) <= raw.len() => &raw[..offset as usize],
            _ => raw,
        }
    }

    pub fn attributes(&self) -> Vec<AttributeView<'a>> {
        self.doc.attributes(self.id)
    }

    /// Attribute value by canonical name; boolean attributes read as `""`.
    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        let wanted = canonical_name(name);
        if let Some(attr) = self
            .attributes()
            .into_iter()
            .find(|attr| canonical_name(attr.name) == wanted)
        {
            return Some(attr.value.unwrap_or_default());
        }
        self.doc
            .synthetic_meta(self.id)
            .and_then(|meta| meta.attribute(&wanted))
            .map(|attr| attr.value.as_deref().unwrap_or_default())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    pub fn is_self_closing(&self) -> bool {
        self.doc.get(self.id).flags.contains(NodeFlags::SELF_CLOSING)
            || self
                .doc
                .synthetic_meta(self.id)
                .is_some_and(|meta| meta.self_closing)
    }

    pub fn is_void(&self) -> bool {
        self.doc.get(self.id).flags.contains(NodeFlags::VOID)
            || self.doc.synthetic_meta(self.id).is_some_and(|meta| meta.void)
    }

    pub fn is_component(&self) -> bool {
        self.doc.registries().is_component(self.tag_name())
    }
}

/// HTML5 void elements - these never have end tags.
pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub(crate) fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

/// Attribute names compare ASCII case-insensitively.
pub(crate) fn canonical_name(name: &str) -> CompactString {
    CompactString::from(name.to_ascii_lowercase())
}

fn unquote_attribute_value(text: &str) -> &str {
    let value = text.trim_start().trim_start_matches('=').trim();
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            return rest.strip_suffix(quote).unwrap_or(rest);
        }
    }
    value
}

// Template expressions inside values must survive untouched, so only the
// delimiter is escaped.
fn escape_attribute_value(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_render_is_verbatim() {
        let source = "<div class=\"a\"  id=x>hi {{ $name }}</div>\n@if($x)<br>@endif";
        let doc = Document::parse(source);
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_element_flags() {
        let doc = Document::parse("<br/><hr><p>x</p>");
        let flags: Vec<_> = doc.root_elements().map(|id| doc.get(id).flags).collect();
        assert_eq!(flags[0], NodeFlags::SELF_CLOSING | NodeFlags::VOID);
        assert_eq!(flags[1], NodeFlags::VOID);
        assert!(flags[2].is_empty());
        assert!(!doc.get(doc.root()).needs_composition());
    }

    #[test]
    fn test_attribute_views() {
        let doc = Document::parse(r#"<input type="text" disabled :value='name' data-x=1>"#);
        let input = doc.root_elements().next().unwrap();
        let element = doc.element(input).unwrap();
        assert_eq!(element.tag_name(), "input");
        assert!(element.is_void());

        let attrs = element.attributes();
        let names: Vec<_> = attrs.iter().map(|attr| attr.name).collect();
        assert_eq!(names, vec!["type", "disabled", ":value", "data-x"]);
        assert_eq!(attrs[0].value, Some("text"));
        assert_eq!(attrs[1].value, None);
        assert_eq!(attrs[2].value, Some("name"));
        assert_eq!(attrs[2].raw, ":value='name'");
        assert_eq!(element.attribute("DATA-X"), Some("1"));
        assert_eq!(element.attribute("disabled"), Some(""));
        assert_eq!(element.attribute("missing"), None);
    }

    #[test]
    fn test_content_children_skip_markup() {
        let doc = Document::parse("<p id=a>one<b>two</b></p>");
        let p = doc.root_elements().next().unwrap();
        let kinds: Vec<_> = doc.content_children(p).map(|id| doc.kind(id)).collect();
        assert_eq!(kinds, vec![NodeKind::Text, NodeKind::Element]);
        assert_eq!(doc.render_node(p), "<p id=a>one<b>two</b></p>");
    }

    #[test]
    fn test_block_markup_children() {
        let doc = Document::parse("@foreach($items as $item)<li>{{ $item }}</li>@endforeach");
        let block = doc.root_children().next().unwrap();
        assert_eq!(doc.kind(block), NodeKind::DirectiveBlock);
        let first = doc.children(block).next().unwrap();
        let last = doc.get_node(block).last_child().unwrap();
        assert!(doc.is_opening_child(block, first));
        assert!(doc.is_closing_child(block, last));
        assert_eq!(doc.content_children(block).count(), 1);
    }

    #[test]
    fn test_synthetic_meta_rendering() {
        let meta = SyntheticMeta {
            tag_name: "span".into(),
            attributes: vec![
                SyntheticAttribute::new("Class", Some("a \"b\"".into())),
                SyntheticAttribute::new("hidden", None),
            ],
            inner: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(meta.open_tag(), "<span class=\"a &quot;b&quot;\" hidden>");
        assert_eq!(meta.render_leaf(), "<span class=\"a &quot;b&quot;\" hidden>x</span>");

        let void = SyntheticMeta {
            tag_name: "br".into(),
            void: true,
            ..Default::default()
        };
        assert_eq!(void.render_leaf(), "<br>");

        let unclosed = SyntheticMeta {
            tag_name: "li".into(),
            inner: Some("a".into()),
            unclosed: true,
            ..Default::default()
        };
        assert_eq!(unclosed.render_leaf(), "<li>a");
    }

    #[test]
    fn test_generic_tag_name() {
        let doc = Document::parse("<Select<Item> items={list} />");
        let select = doc.root_elements().next().unwrap();
        let element = doc.element(select).unwrap();
        assert_eq!(element.raw_name(), "Select<Item>");
        assert_eq!(element.tag_name(), "Select");
        assert!(element.is_self_closing());
        assert_eq!(element.attribute("items"), Some("{list}"));
    }
}

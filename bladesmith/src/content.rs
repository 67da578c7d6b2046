//! Synthetic content: values describing nodes a rewrite pass inserts.
//!
//! Content is accepted as pre-formed text. Nothing here is re-tokenized or
//! validated; a builder only knows how to render itself and how it should be
//! placed next to what is already emitted.

use crate::document::{NodeKind, SyntheticAttribute, SyntheticMeta, is_void_element};
use compact_str::CompactString;
use std::fmt;
use std::sync::Arc;

/// Something that can be materialized as a synthetic node.
pub trait ContentBuilder: fmt::Debug + Send + Sync {
    /// Kind of the node this content becomes.
    fn kind(&self) -> NodeKind;

    /// The whole fragment as text.
    fn render(&self) -> String;

    /// Whether a space must separate this from a preceding word character.
    fn needs_leading_separator(&self) -> bool {
        false
    }

    /// Element shape, for element-like content.
    fn element(&self) -> Option<SyntheticMeta> {
        None
    }

    /// Directive name and arguments, for directive-like content.
    fn directive(&self) -> Option<(&str, Option<&str>)> {
        None
    }

    /// Opening and closing fragments, for content that can straddle other nodes.
    fn fragments(&self) -> Option<(String, String)> {
        None
    }

    fn children(&self) -> &[Content] {
        &[]
    }
}

/// Shared handle to a [`ContentBuilder`].
#[derive(Clone)]
pub struct Content(Arc<dyn ContentBuilder>);

impl Content {
    pub fn new(builder: impl ContentBuilder + 'static) -> Self {
        Content(Arc::new(builder))
    }

    pub fn kind(&self) -> NodeKind {
        self.0.kind()
    }

    pub fn render(&self) -> String {
        self.0.render()
    }

    pub fn needs_leading_separator(&self) -> bool {
        self.0.needs_leading_separator()
    }

    pub fn element(&self) -> Option<SyntheticMeta> {
        self.0.element()
    }

    pub fn directive(&self) -> Option<(&str, Option<&str>)> {
        self.0.directive()
    }

    /// Opening and closing text when this content wraps other nodes.
    ///
    /// Element-shaped content splits at its children; anything else opens
    /// with its full rendering and closes with nothing.
    pub fn fragments(&self) -> (String, String) {
        if let Some(fragments) = self.0.fragments() {
            return fragments;
        }
        match self.0.element() {
            Some(meta) => (meta.open_tag(), meta.close_tag()),
            None => (self.0.render(), String::new()),
        }
    }

    pub fn children(&self) -> &[Content] {
        self.0.children()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::new(RawText::new(text))
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::new(RawText::new(text))
    }
}

macro_rules! content_from_builder {
    ($($builder:ty),* $(,)?) => {
        $(
            impl From<$builder> for Content {
                fn from(builder: $builder) -> Self {
                    Content::new(builder)
                }
            }
        )*
    };
}

content_from_builder!(RawText, ElementBuilder, DirectiveBuilder, Echo, CommentBuilder);

/// Plain text, inserted as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawText {
    text: CompactString,
}

impl RawText {
    pub fn new(text: impl Into<CompactString>) -> Self {
        RawText { text: text.into() }
    }
}

impl ContentBuilder for RawText {
    fn kind(&self) -> NodeKind {
        NodeKind::Text
    }

    fn render(&self) -> String {
        self.text.to_string()
    }
}

/// An element with attributes and children.
///
/// Attribute names are stored canonical (lowercase), in insertion order;
/// setting an attribute twice keeps the first position and the last value.
#[derive(Debug, Clone)]
pub struct ElementBuilder {
    tag: CompactString,
    attributes: Vec<SyntheticAttribute>,
    children: Vec<Content>,
    self_closing: bool,
    void: bool,
}

impl ElementBuilder {
    pub fn new(tag: impl Into<CompactString>) -> Self {
        let tag = tag.into();
        let void = is_void_element(&tag);
        ElementBuilder {
            tag,
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: false,
            void,
        }
    }

    pub fn attr(mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        self.put(SyntheticAttribute::new(name, Some(value.into())));
        self
    }

    /// Boolean attribute, rendered without a value.
    pub fn flag(mut self, name: impl Into<CompactString>) -> Self {
        self.put(SyntheticAttribute::new(name, None));
        self
    }

    pub fn child(mut self, child: impl Into<Content>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Content>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn self_closing(mut self) -> Self {
        self.self_closing = true;
        self
    }

    pub fn void(mut self) -> Self {
        self.void = true;
        self
    }

    fn put(&mut self, attribute: SyntheticAttribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    fn meta(&self) -> SyntheticMeta {
        let inner = (!self.children.is_empty()).then(|| {
            CompactString::from(self.children.iter().map(Content::render).collect::<String>())
        });
        SyntheticMeta {
            tag_name: self.tag.clone(),
            attributes: self.attributes.clone(),
            self_closing: self.self_closing,
            void: self.void,
            inner,
            unclosed: false,
        }
    }
}

impl ContentBuilder for ElementBuilder {
    fn kind(&self) -> NodeKind {
        NodeKind::Element
    }

    fn render(&self) -> String {
        self.meta().render_leaf()
    }

    fn element(&self) -> Option<SyntheticMeta> {
        Some(self.meta())
    }

    fn children(&self) -> &[Content] {
        &self.children
    }
}

/// `@name` or `@name(args)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveBuilder {
    name: CompactString,
    args: Option<CompactString>,
}

impl DirectiveBuilder {
    pub fn new(name: impl Into<CompactString>) -> Self {
        DirectiveBuilder {
            name: name.into(),
            args: None,
        }
    }

    pub fn args(mut self, args: impl Into<CompactString>) -> Self {
        self.args = Some(args.into());
        self
    }
}

impl ContentBuilder for DirectiveBuilder {
    fn kind(&self) -> NodeKind {
        NodeKind::Directive
    }

    fn render(&self) -> String {
        match &self.args {
            Some(args) => format!("@{}({})", self.name, args),
            None => format!("@{}", self.name),
        }
    }

    // `foo@if` would not lex as a directive
    fn needs_leading_separator(&self) -> bool {
        true
    }

    fn directive(&self) -> Option<(&str, Option<&str>)> {
        Some((self.name.as_str(), self.args.as_deref()))
    }
}

/// `{{ expr }}`, or `{!! expr !!}` when raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    expression: CompactString,
    raw: bool,
}

impl Echo {
    pub fn escaped(expression: impl Into<CompactString>) -> Self {
        Echo {
            expression: expression.into(),
            raw: false,
        }
    }

    pub fn raw(expression: impl Into<CompactString>) -> Self {
        Echo {
            expression: expression.into(),
            raw: true,
        }
    }
}

impl ContentBuilder for Echo {
    fn kind(&self) -> NodeKind {
        NodeKind::Echo
    }

    fn render(&self) -> String {
        if self.raw {
            format!("{{!! {} !!}}", self.expression)
        } else {
            format!("{{{{ {} }}}}", self.expression)
        }
    }
}

/// An HTML comment, or a template comment that never reaches the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentBuilder {
    text: CompactString,
    template: bool,
}

impl CommentBuilder {
    pub fn html(text: impl Into<CompactString>) -> Self {
        CommentBuilder {
            text: text.into(),
            template: false,
        }
    }

    pub fn template(text: impl Into<CompactString>) -> Self {
        CommentBuilder {
            text: text.into(),
            template: true,
        }
    }
}

impl ContentBuilder for CommentBuilder {
    fn kind(&self) -> NodeKind {
        NodeKind::Comment
    }

    fn render(&self) -> String {
        if self.template {
            format!("{{{{-- {} --}}}}", self.text)
        } else {
            format!("<!-- {} -->", self.text)
        }
    }
}

pub fn text(text: impl Into<CompactString>) -> RawText {
    RawText::new(text)
}

pub fn element(tag: impl Into<CompactString>) -> ElementBuilder {
    ElementBuilder::new(tag)
}

pub fn directive(name: impl Into<CompactString>) -> DirectiveBuilder {
    DirectiveBuilder::new(name)
}

pub fn echo(expression: impl Into<CompactString>) -> Echo {
    Echo::escaped(expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_element_rendering() {
        let card = element("section")
            .attr("Class", "card")
            .flag("hidden")
            .attr("class", "card wide")
            .child("hi ")
            .child(echo("$name"));
        assert_eq!(
            card.render(),
            r#"<section class="card wide" hidden>hi {{ $name }}</section>"#
        );

        let content = Content::from(card);
        assert_eq!(content.kind(), NodeKind::Element);
        assert_eq!(content.children().len(), 2);
        let (open, close) = content.fragments();
        assert_eq!(open, r#"<section class="card wide" hidden>"#);
        assert_eq!(close, "</section>");
    }

    #[test]
    fn test_void_and_self_closing() {
        assert_eq!(element("br").render(), "<br>");
        assert_eq!(
            element("x-icon").attr("name", "star").self_closing().render(),
            r#"<x-icon name="star" />"#
        );
    }

    #[test]
    fn test_directive_and_echo_forms() {
        let content = Content::from(directive("include").args("'nav'"));
        assert_eq!(content.render(), "@include('nav')");
        assert!(content.needs_leading_separator());
        assert_eq!(content.directive(), Some(("include", Some("'nav'"))));
        assert_eq!(directive("csrf").render(), "@csrf");
        assert_eq!(Echo::raw("$html").render(), "{!! $html !!}");
        assert_eq!(CommentBuilder::template("note").render(), "{{-- note --}}");
        assert_eq!(CommentBuilder::html("note").render(), "<!-- note -->");
    }

    #[test]
    fn test_raw_text_has_no_adjacency() {
        let content = Content::from("plain");
        assert!(!content.needs_leading_separator());
        assert_eq!(content.fragments(), ("plain".to_string(), String::new()));
        assert!(content.element().is_none());
    }
}

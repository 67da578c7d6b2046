//! Lexer and tree builder for HTML interleaved with Blade-style directives.
//!
//! This is not a recovering parser: it understands enough of the language to
//! produce a structurally valid [`Document`] whose leaves tile the source, so
//! rendering an unedited Document gives back the input byte for byte.
//! Anything it does not recognise is kept as text.

use crate::document::{
    Document, FlatNode, NodeFlags, NodeKind, Registries, Token, TokenKind, TokenRange,
    is_void_element,
};
use compact_str::CompactString;
use indextree::{Arena, NodeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Raw text elements - content is not tokenized.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Options for parsing.
#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// Directive and component names, passed through to every derived Document
    pub registries: Registries,
}

impl ParseOptions {
    /// Create new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registries wholesale.
    pub fn with_registries(mut self, registries: Registries) -> Self {
        self.registries = registries;
        self
    }

    /// Treat `@name ... @endname` as a block.
    pub fn block_directive(mut self, name: impl Into<CompactString>) -> Self {
        self.registries = self.registries.with_block_directive(name);
        self
    }

    /// Treat tags starting with `prefix` as components.
    pub fn component_prefix(mut self, prefix: impl Into<CompactString>) -> Self {
        self.registries = self.registries.with_component_prefix(prefix);
        self
    }
}

/// Parse with default options.
pub fn parse(source: &str) -> Document {
    parse_with(source, &ParseOptions::default())
}

pub fn parse_with(source: &str, options: &ParseOptions) -> Document {
    let mut parser = Parser::new(source, options);
    parser.run();
    parser.finish()
}

#[derive(Debug)]
enum OpenKind {
    /// Lowercase tag name without generic arguments
    Element(CompactString),
    /// Directive name of the block opener
    Block(CompactString),
}

#[derive(Debug)]
struct Open {
    id: NodeId,
    kind: OpenKind,
}

struct Parser<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    tokens: Vec<Token>,
    arena: Arena<FlatNode>,
    root: NodeId,
    open: Vec<Open>,
    registries: &'s Registries,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str, options: &'s ParseOptions) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(FlatNode::new(NodeKind::Root));
        Parser {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            arena,
            root,
            open: Vec::new(),
            registries: &options.registries,
        }
    }

    fn run(&mut self) {
        while self.pos < self.bytes.len() {
            if !self.construct() {
                self.text();
            }
        }
        while !self.open.is_empty() {
            self.close_top();
        }
        trace!(tokens = self.tokens.len(), "parsed");
    }

    fn finish(self) -> Document {
        let mut arena = self.arena;
        arena[self.root].get_mut().tokens = Some(TokenRange {
            start: 0,
            len: self.tokens.len() as u32,
        });
        Document {
            arena,
            root: self.root,
            source: Arc::from(self.src),
            tokens: Arc::from(self.tokens),
            registries: Arc::new(self.registries.clone()),
            synthetic_content: HashMap::new(),
            synthetic_meta: HashMap::new(),
        }
    }

    // --- tree plumbing ---------------------------------------------------

    fn parent(&self) -> NodeId {
        self.open.last().map(|open| open.id).unwrap_or(self.root)
    }

    fn push_token(&mut self, kind: TokenKind, start: usize, end: usize) -> u32 {
        let index = self.tokens.len() as u32;
        self.tokens.push(Token {
            kind,
            start: start as u32,
            end: end as u32,
        });
        index
    }

    /// Create a node under `parent` whose token range starts at the next token.
    fn open_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let mut node = FlatNode::new(kind);
        node.tokens = Some(TokenRange {
            start: self.tokens.len() as u32,
            len: 0,
        });
        let id = self.arena.new_node(node);
        parent.append(id, &mut self.arena);
        id
    }

    /// Extend a node's token range up to the last pushed token.
    fn seal(&mut self, id: NodeId) {
        let total = self.tokens.len() as u32;
        if let Some(range) = self.arena[id].get_mut().tokens.as_mut() {
            range.len = total - range.start;
        }
    }

    fn leaf(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        token: TokenKind,
        start: usize,
        end: usize,
    ) -> NodeId {
        let id = self.open_node(parent, kind);
        self.push_token(token, start, end);
        self.seal(id);
        id
    }

    fn close_top(&mut self) {
        if let Some(open) = self.open.pop() {
            self.seal(open.id);
        }
    }

    // --- scanning helpers ------------------------------------------------

    fn at(&self, p: usize) -> u8 {
        self.bytes.get(p).copied().unwrap_or(0)
    }

    fn starts_with_at(&self, p: usize, needle: &str) -> bool {
        self.src.as_bytes()[p..].starts_with(needle.as_bytes())
    }

    /// End of the first `needle` at or after `from`, or end of input.
    fn end_after(&self, from: usize, needle: &str) -> usize {
        self.src[from..]
            .find(needle)
            .map(|i| from + i + needle.len())
            .unwrap_or(self.bytes.len())
    }

    fn name_end(&self, mut p: usize) -> usize {
        while p < self.bytes.len() && is_name_byte(self.bytes[p]) {
            p += 1;
        }
        p
    }

    /// Index of the bracket matching the one at `open_at`, skipping quoted runs.
    fn matching(&self, open_at: usize, open: u8, close: u8) -> Option<usize> {
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        let mut p = open_at;
        while p < self.bytes.len() {
            let b = self.bytes[p];
            if let Some(q) = quote {
                if b == b'\\' {
                    p += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
            } else if (b == b'"' || b == b'\'') && open != b'<' {
                quote = Some(b);
            } else if b == open {
                depth += 1;
            } else if b == close {
                depth -= 1;
                if depth == 0 {
                    return Some(p);
                }
            }
            p += 1;
        }
        None
    }

    fn open_element_named(&self, tag: &str) -> Option<usize> {
        self.open
            .iter()
            .rposition(|open| matches!(&open.kind, OpenKind::Element(name) if name == tag))
    }

    fn open_block_named(&self, directive: &str) -> Option<usize> {
        self.open
            .iter()
            .rposition(|open| matches!(&open.kind, OpenKind::Block(name) if name == directive))
    }

    /// Whether a construct (anything but text) starts at `p`.
    fn construct_at(&self, p: usize) -> bool {
        match self.at(p) {
            b'<' => {
                let next = self.at(p + 1);
                if next.is_ascii_alphabetic() {
                    return true;
                }
                if next == b'/' && self.at(p + 2).is_ascii_alphabetic() {
                    let end = self.name_end(p + 2);
                    let tag = self.src[p + 2..end].to_ascii_lowercase();
                    return self.open_element_named(&tag).is_some();
                }
                self.starts_with_at(p, "<!--")
                    || self.starts_with_at(p, "<?php")
                    || self.starts_with_at(p, "<?=")
            }
            b'{' => self.starts_with_at(p, "{{") || self.starts_with_at(p, "{!!"),
            b'@' => {
                let before = if p == 0 { b' ' } else { self.bytes[p - 1] };
                let word_before = before.is_ascii_alphanumeric() || before == b'_' || before == b'.';
                !word_before && self.at(p + 1).is_ascii_alphabetic()
            }
            _ => false,
        }
    }

    // --- constructs ------------------------------------------------------

    fn text(&mut self) {
        let start = self.pos;
        let mut p = start;
        while p < self.bytes.len() {
            if self.bytes[p] == b'@' && self.at(p + 1) == b'@' {
                p += 2;
                continue;
            }
            if p > start && self.construct_at(p) {
                break;
            }
            p += 1;
        }
        let p = p.min(self.bytes.len());
        let parent = self.parent();
        self.leaf(parent, NodeKind::Text, TokenKind::Text, start, p);
        self.pos = p;
    }

    fn construct(&mut self) -> bool {
        let p = self.pos;
        if !self.construct_at(p) {
            return false;
        }
        if self.starts_with_at(p, "<!--") {
            let end = self.end_after(p + 4, "-->");
            self.simple(NodeKind::Comment, TokenKind::Comment, end);
        } else if self.starts_with_at(p, "<?php") || self.starts_with_at(p, "<?=") {
            let end = self.end_after(p + 3, "?>");
            self.simple(NodeKind::PhpTag, TokenKind::PhpTag, end);
        } else if self.starts_with_at(p, "</") {
            self.closing_tag();
        } else if self.at(p) == b'<' {
            self.opening_tag();
        } else if self.starts_with_at(p, "{{--") {
            let end = self.end_after(p + 4, "--}}");
            self.simple(NodeKind::Comment, TokenKind::Comment, end);
        } else if self.starts_with_at(p, "{!!") {
            self.echo(TokenKind::RawEcho, "!!}");
        } else if self.starts_with_at(p, "{{") {
            self.echo(TokenKind::Echo, "}}");
        } else {
            self.directive();
        }
        true
    }

    fn simple(&mut self, kind: NodeKind, token: TokenKind, end: usize) {
        let parent = self.parent();
        self.leaf(parent, kind, token, self.pos, end);
        self.pos = end;
    }

    fn echo(&mut self, token: TokenKind, close: &str) {
        let start = self.pos;
        let open_len = close.len();
        let end = self.end_after(start + open_len, close);
        let inner_end = if self.src[..end].ends_with(close) {
            end - close.len()
        } else {
            end
        };
        let parent = self.parent();
        let id = self.leaf(parent, NodeKind::Echo, token, start, end);
        let src = self.src;
        let expression = src[start + open_len..inner_end.max(start + open_len)].trim();
        self.arena[id].get_mut().args = Some(CompactString::from(expression));
        self.pos = end;
    }

    fn directive(&mut self) {
        let src = self.src;
        let start = self.pos;
        let name_end = self.name_end(start + 1);
        let name = &src[start + 1..name_end];
        let mut end = name_end;
        let mut args = None;
        if self.at(name_end) == b'(' {
            match self.matching(name_end, b'(', b')') {
                Some(close) => {
                    args = Some(&src[name_end + 1..close]);
                    end = close + 1;
                }
                None => {
                    args = Some(&src[name_end + 1..]);
                    end = self.bytes.len();
                }
            }
        }

        if name == "php" && args.is_none() {
            let end = self.end_after(end, "@endphp");
            self.simple(NodeKind::PhpBlock, TokenKind::PhpBlock, end);
            return;
        }

        let closes = name
            .strip_prefix("end")
            .and_then(|opener| self.open_block_named(opener));
        let opens = closes.is_none()
            && self.registries.is_block_directive(name)
            && src[end..].contains(&format!("@end{name}"));

        if let Some(index) = closes {
            while self.open.len() > index + 1 {
                self.close_top();
            }
        }
        let parent = if opens {
            let block = self.open_node(self.parent(), NodeKind::DirectiveBlock);
            self.open.push(Open {
                id: block,
                kind: OpenKind::Block(CompactString::from(name)),
            });
            block
        } else {
            self.parent()
        };

        let id = self.leaf(parent, NodeKind::Directive, TokenKind::Directive, start, end);
        let node = self.arena[id].get_mut();
        node.name = Some(CompactString::from(name));
        node.args = args.map(CompactString::from);
        self.pos = end;

        if closes.is_some() {
            self.close_top();
        }
    }

    fn closing_tag(&mut self) {
        let start = self.pos;
        let name_end = self.name_end(start + 2);
        let tag = self.src[start + 2..name_end].to_ascii_lowercase();
        let end = self.end_after(name_end, ">");
        let Some(index) = self.open_element_named(&tag) else {
            // construct_at only admits closing tags with an open match
            self.simple(NodeKind::Text, TokenKind::Text, end);
            return;
        };
        while self.open.len() > index + 1 {
            self.close_top();
        }
        let element = self.parent();
        self.leaf(
            element,
            NodeKind::ClosingElementName,
            TokenKind::ClosingTag,
            start,
            end,
        );
        self.pos = end;
        self.close_top();
    }

    fn opening_tag(&mut self) {
        let start = self.pos;
        let parent = self.parent();
        let element = self.open_node(parent, NodeKind::Element);

        let name_start = start + 1;
        let mut p = self.name_end(name_start);
        let tag = self.src[name_start..p].to_ascii_lowercase();
        if self.at(p) == b'<' {
            if let Some(close) = self.matching(p, b'<', b'>') {
                self.arena[element].get_mut().generic_offset = Some((p - name_start) as u32);
                p = close + 1;
            }
        }
        self.leaf(element, NodeKind::ElementName, TokenKind::TagOpen, start, p);

        let mut self_closing = false;
        let mut terminated = false;
        while p < self.bytes.len() {
            let b = self.bytes[p];
            if b.is_ascii_whitespace() {
                let mut q = p;
                while q < self.bytes.len() && self.bytes[q].is_ascii_whitespace() {
                    q += 1;
                }
                self.leaf(
                    element,
                    NodeKind::AttributeWhitespace,
                    TokenKind::Whitespace,
                    p,
                    q,
                );
                p = q;
            } else if b == b'>' {
                self.leaf(element, NodeKind::TagEnd, TokenKind::TagEnd, p, p + 1);
                p += 1;
                terminated = true;
                break;
            } else if b == b'/' && self.at(p + 1) == b'>' {
                self.leaf(element, NodeKind::TagEnd, TokenKind::TagEnd, p, p + 2);
                p += 2;
                self_closing = true;
                terminated = true;
                break;
            } else {
                p = self.attribute(element, p);
            }
        }
        self.pos = p;

        let void = is_void_element(&tag);
        {
            let flags = &mut self.arena[element].get_mut().flags;
            if self_closing {
                flags.insert(NodeFlags::SELF_CLOSING);
            }
            if void {
                flags.insert(NodeFlags::VOID);
            }
        }

        if self_closing || void || !terminated {
            self.seal(element);
            return;
        }
        self.open.push(Open {
            id: element,
            kind: OpenKind::Element(CompactString::from(tag.as_str())),
        });

        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            let lower = self.src[p..].to_ascii_lowercase();
            let content_end = lower
                .find(&format!("</{tag}"))
                .map(|i| p + i)
                .unwrap_or(self.bytes.len());
            if content_end > p {
                self.leaf(element, NodeKind::Text, TokenKind::Text, p, content_end);
            }
            self.pos = content_end;
        }
    }

    /// One attribute starting at `p`; returns the position after it.
    fn attribute(&mut self, element: NodeId, p: usize) -> usize {
        let attr = self.open_node(element, NodeKind::Attribute);
        let name_end = if self.starts_with_at(p, "{{") {
            self.end_after(p + 2, "}}")
        } else if self.starts_with_at(p, "{!!") {
            self.end_after(p + 3, "!!}")
        } else if self.at(p) == b'@' {
            let end = self.name_end(p + 1);
            if self.at(end) == b'(' {
                self.matching(end, b'(', b')')
                    .map(|close| close + 1)
                    .unwrap_or(self.bytes.len())
            } else {
                end
            }
        } else {
            let mut q = p;
            while q < self.bytes.len() {
                let b = self.bytes[q];
                if b.is_ascii_whitespace() || b == b'=' || b == b'>' {
                    break;
                }
                if b == b'/' && self.at(q + 1) == b'>' {
                    break;
                }
                q += 1;
            }
            // a lone `=` still has to make progress
            q.max(p + 1)
        };
        self.leaf(
            attr,
            NodeKind::AttributeName,
            TokenKind::AttributeName,
            p,
            name_end,
        );

        let mut q = name_end;
        while q < self.bytes.len() && self.bytes[q].is_ascii_whitespace() {
            q += 1;
        }
        let mut end = name_end;
        if self.at(q) == b'=' {
            let mut r = q + 1;
            while r < self.bytes.len() && self.bytes[r].is_ascii_whitespace() {
                r += 1;
            }
            end = match self.at(r) {
                quote @ (b'"' | b'\'') => self.src[r + 1..]
                    .find(quote as char)
                    .map(|i| r + 1 + i + 1)
                    .unwrap_or(self.bytes.len()),
                b'{' => self
                    .matching(r, b'{', b'}')
                    .map(|close| close + 1)
                    .unwrap_or(self.bytes.len()),
                _ => {
                    let mut s = r;
                    while s < self.bytes.len()
                        && !self.bytes[s].is_ascii_whitespace()
                        && self.bytes[s] != b'>'
                    {
                        s += 1;
                    }
                    s
                }
            };
            self.leaf(
                attr,
                NodeKind::AttributeValue,
                TokenKind::AttributeValue,
                name_end,
                end,
            );
        }
        self.seal(attr);
        end
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    fn kinds(doc: &Document, id: NodeId) -> Vec<NodeKind> {
        doc.children(id).map(|child| doc.kind(child)).collect()
    }

    #[test]
    fn test_element_children_tile_tokens() {
        let doc = parse(r#"<div class="a" hidden>x</div>"#);
        let div = doc.root_children().next().unwrap();
        assert_eq!(
            kinds(&doc, div),
            vec![
                NodeKind::ElementName,
                NodeKind::AttributeWhitespace,
                NodeKind::Attribute,
                NodeKind::AttributeWhitespace,
                NodeKind::Attribute,
                NodeKind::TagEnd,
                NodeKind::Text,
                NodeKind::ClosingElementName,
            ]
        );
        let concatenated: String = doc.children(div).map(|c| doc.render_node(c)).collect();
        assert_eq!(concatenated, doc.text(div).unwrap());
    }

    #[test]
    fn test_directive_blocks_pair_with_end() {
        let doc = parse("@if($a)<b>yes</b>@else no @endif tail");
        let block = doc.root_children().next().unwrap();
        assert_eq!(doc.kind(block), NodeKind::DirectiveBlock);
        assert_eq!(
            kinds(&doc, block),
            vec![
                NodeKind::Directive,
                NodeKind::Element,
                NodeKind::Directive,
                NodeKind::Text,
                NodeKind::Directive,
            ]
        );
        let opener = doc.children(block).next().unwrap();
        assert_eq!(doc.get(opener).name.as_deref(), Some("if"));
        assert_eq!(doc.get(opener).args.as_deref(), Some("$a"));
        assert_eq!(doc.render(), "@if($a)<b>yes</b>@else no @endif tail");
    }

    #[test]
    fn test_unpaired_block_directive_is_plain() {
        let doc = parse("@section('title', 'Home') rest");
        let first = doc.root_children().next().unwrap();
        assert_eq!(doc.kind(first), NodeKind::Directive);
        assert_eq!(doc.get(first).args.as_deref(), Some("'title', 'Home'"));
    }

    #[test]
    fn test_escapes_and_emails_are_text() {
        let doc = parse("mail me@example.com or write @@if literally");
        assert_eq!(kinds(&doc, doc.root()), vec![NodeKind::Text]);
        assert_eq!(doc.render(), "mail me@example.com or write @@if literally");
    }

    #[test]
    fn test_echoes_comments_and_php() {
        let source = "{{ $a }}{!! $b !!}{{-- note --}}<!-- c --><?php echo 1; ?>@php $x = 1; @endphp";
        let doc = parse(source);
        assert_eq!(
            kinds(&doc, doc.root()),
            vec![
                NodeKind::Echo,
                NodeKind::Echo,
                NodeKind::Comment,
                NodeKind::Comment,
                NodeKind::PhpTag,
                NodeKind::PhpBlock,
            ]
        );
        let first = doc.root_children().next().unwrap();
        assert_eq!(doc.get(first).args.as_deref(), Some("$a"));
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_stray_and_implicit_closes() {
        let source = "</span><div><p>a</div>b";
        let doc = parse(source);
        assert_eq!(
            kinds(&doc, doc.root()),
            vec![NodeKind::Text, NodeKind::Element, NodeKind::Text]
        );
        let div = doc.root_elements().next().unwrap();
        let p = doc.content_children(div).next().unwrap();
        assert_eq!(doc.render_node(p), "<p>a");
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_raw_text_elements() {
        let source = "<script>if (a < b) { @notadirective }</script>";
        let doc = parse(source);
        let script = doc.root_elements().next().unwrap();
        assert_eq!(doc.content_children(script).count(), 1);
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_bound_and_template_attributes() {
        let source = r#"<x-alert :type="$type" @click="go()" {{ $attributes }} @class(['a' => $b])/>"#;
        let doc = parse(source);
        let alert = doc.root_elements().next().unwrap();
        let element = doc.element(alert).unwrap();
        assert!(element.is_component());
        assert!(element.is_self_closing());
        let names: Vec<_> = element.attributes().iter().map(|a| a.name).collect();
        assert_eq!(
            names,
            vec![":type", "@click", "{{ $attributes }}", "@class(['a' => $b])"]
        );
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_unterminated_input_is_preserved() {
        for source in ["<div class=\"a", "{{ $x", "@if($a", "<!-- open", "<p>text"] {
            assert_eq!(parse(source).render(), source);
        }
    }

    #[test]
    fn test_registries_pass_through() {
        let options = ParseOptions::new()
            .block_directive("markdown")
            .component_prefix("livewire:");
        let doc = parse_with("@markdown # hi @endmarkdown<livewire:counter />", &options);
        let block = doc.root_children().next().unwrap();
        assert_eq!(doc.kind(block), NodeKind::DirectiveBlock);
        let counter = doc.root_elements().next().unwrap();
        assert!(doc.element(counter).unwrap().is_component());
    }
}

//! Rewriting of HTML templates with Blade-style directives.
//!
//! bladesmith provides:
//! - **Parsing**: a flat, immutable [`Document`] whose leaves tile the source
//! - **Rewriting**: visitors queue edits through a [`NodePath`], and a pass
//!   builds a new Document from them
//! - **Fidelity**: anything that was not edited renders exactly as written
//!
//! # Example
//!
//! ```rust
//! use bladesmith::{Document, FnVisitor, rewrite};
//!
//! let doc = Document::parse("<div>old</div>");
//! let out = rewrite(
//!     &doc,
//!     FnVisitor::new().on_enter(|path| {
//!         if path.is_tag("div") {
//!             path.set_attribute("class", "a")?.add_class("b")?;
//!         }
//!         Ok(())
//!     }),
//! )
//! .unwrap();
//! assert_eq!(out.render(), r#"<div class="a b">old</div>"#);
//! ```

#[macro_use]
mod tracing_macros;

pub mod content;
pub mod document;
mod error;
mod parser;
pub mod rewrite;

pub use content::{
    CommentBuilder, Content, ContentBuilder, DirectiveBuilder, Echo, ElementBuilder, RawText,
    directive, echo, element, text,
};
pub use document::{
    AttributeView, Document, ElementView, FlatNode, NodeFlags, NodeKind, Registries,
    SyntheticAttribute, SyntheticContent, SyntheticMeta, Token, TokenKind, TokenRange,
};
pub use error::RewriteError;
pub use indextree::NodeId;
pub use parser::{ParseOptions, parse, parse_with};
pub use rewrite::{
    AttributeChange, ChildPosition, DocumentBuilder, FnVisitor, NodePath, Operation,
    OperationKind, Pass, Pipeline, RewriteContext, Visitor, rewrite,
};

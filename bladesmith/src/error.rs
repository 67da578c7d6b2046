//! Errors raised by the rewrite engine.
//!
//! Both variants are programmer errors: a visitor asked for something that
//! cannot apply to the node it is looking at, or the tree builder was driven
//! out of balance. The Document itself is always structurally valid.

use facet::Facet;

/// Invalid operations surfaced at the offending call.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum RewriteError {
    /// {operation} requires an element node, found {kind}
    NotAnElement { operation: String, kind: String },

    /// cannot pop the document root off the builder's parent stack
    PopPastRoot,
}

impl RewriteError {
    pub(crate) fn not_an_element(operation: &str, kind: impl std::fmt::Debug) -> Self {
        RewriteError::NotAnElement {
            operation: operation.to_string(),
            kind: format!("{kind:?}"),
        }
    }
}

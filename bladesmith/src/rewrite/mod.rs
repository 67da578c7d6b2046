//! The rewrite engine.
//!
//! A pass walks an input [`Document`](crate::Document) in document order and
//! runs its visitors at every node. Visitors queue edits through a
//! [`NodePath`]; the rewriter applies them while assembling a new Document,
//! copying everything that was not edited byte for byte.

mod context;
mod path;
mod rewriter;
mod tree_builder;
mod visitor;

pub use context::{AttributeChange, Operation, OperationKind, RewriteContext};
pub use path::NodePath;
pub use tree_builder::{ChildPosition, DocumentBuilder};
pub use visitor::{FnVisitor, Pass, Pipeline, Visitor, rewrite};

//! Visitors, passes and pipelines.

use super::path::NodePath;
use super::rewriter::Rewriter;
use crate::document::Document;
use crate::error::RewriteError;

/// Callbacks run at every node of a pass, in document order.
///
/// `enter` runs before the node is emitted, `leave` after its subtree was.
/// Removed and replaced nodes get no `leave`.
pub trait Visitor {
    fn enter(&mut self, _path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        Ok(())
    }

    fn leave(&mut self, _path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        Ok(())
    }
}

impl<V: Visitor + ?Sized> Visitor for &mut V {
    fn enter(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        (**self).enter(path)
    }

    fn leave(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        (**self).leave(path)
    }
}

impl<V: Visitor + ?Sized> Visitor for Box<V> {
    fn enter(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        (**self).enter(path)
    }

    fn leave(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        (**self).leave(path)
    }
}

type Callback<'f> = Box<dyn FnMut(&mut NodePath<'_>) -> Result<(), RewriteError> + 'f>;

/// A visitor made of closures.
///
/// ```
/// use bladesmith::{Document, FnVisitor, rewrite};
///
/// let doc = Document::parse("<p>a</p><hr><p>b</p>");
/// let out = rewrite(
///     &doc,
///     FnVisitor::new().on_enter(|path| {
///         if path.is_tag("hr") {
///             path.remove();
///         }
///         Ok(())
///     }),
/// )
/// .unwrap();
/// assert_eq!(out.render(), "<p>a</p><p>b</p>");
/// ```
#[derive(Default)]
pub struct FnVisitor<'f> {
    enter: Option<Callback<'f>>,
    leave: Option<Callback<'f>>,
}

impl<'f> FnVisitor<'f> {
    pub fn new() -> Self {
        FnVisitor {
            enter: None,
            leave: None,
        }
    }

    pub fn on_enter(
        mut self,
        f: impl FnMut(&mut NodePath<'_>) -> Result<(), RewriteError> + 'f,
    ) -> Self {
        self.enter = Some(Box::new(f));
        self
    }

    pub fn on_leave(
        mut self,
        f: impl FnMut(&mut NodePath<'_>) -> Result<(), RewriteError> + 'f,
    ) -> Self {
        self.leave = Some(Box::new(f));
        self
    }
}

impl Visitor for FnVisitor<'_> {
    fn enter(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        match &mut self.enter {
            Some(f) => f(path),
            None => Ok(()),
        }
    }

    fn leave(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
        match &mut self.leave {
            Some(f) => f(path),
            None => Ok(()),
        }
    }
}

/// One rewrite pass: an ordered list of visitors run together.
#[derive(Default)]
pub struct Pass<'v> {
    visitors: Vec<Box<dyn Visitor + 'v>>,
}

impl<'v> Pass<'v> {
    pub fn new() -> Self {
        Pass {
            visitors: Vec::new(),
        }
    }

    pub fn with(mut self, visitor: impl Visitor + 'v) -> Self {
        self.add(visitor);
        self
    }

    pub fn add(&mut self, visitor: impl Visitor + 'v) {
        self.visitors.push(Box::new(visitor));
    }

    /// Build a new Document from `doc`. The input is not modified.
    pub fn run(&mut self, doc: &Document) -> Result<Document, RewriteError> {
        Rewriter::new(doc, &mut self.visitors).run()
    }
}

/// Passes run in order, each reading the previous one's output.
#[derive(Default)]
pub struct Pipeline<'v> {
    passes: Vec<Pass<'v>>,
}

impl<'v> Pipeline<'v> {
    pub fn new() -> Self {
        Pipeline { passes: Vec::new() }
    }

    pub fn pass(mut self, pass: Pass<'v>) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn run(&mut self, doc: &Document) -> Result<Document, RewriteError> {
        let mut current: Option<Document> = None;
        for pass in &mut self.passes {
            let next = pass.run(current.as_ref().unwrap_or(doc))?;
            debug!(nodes = next.node_count(), "pipeline pass done");
            current = Some(next);
        }
        Ok(current.unwrap_or_else(|| doc.clone()))
    }
}

/// Run a single visitor over `doc`.
pub fn rewrite(doc: &Document, visitor: impl Visitor) -> Result<Document, RewriteError> {
    Pass::new().with(visitor).run(doc)
}

//! The common operator interface every node in an execution plan implements.
//!
//! Operators follow the open/next/close (Volcano) protocol: `open` prepares
//! internal state, `next` pulls one tuple at a time (returning `None` once
//! exhausted), `close` releases any pinned pages. Operators that buffer
//! whole pages internally (scan, join) still expose this tuple-at-a-time
//! interface to their parent.

use crate::catalog::Schema;
use crate::error::Result;
use crate::storage::{PageId, Tuple};

pub trait Operator: std::fmt::Debug {
    /// The schema of tuples this operator yields.
    fn schema(&self) -> &Schema;

    /// Prepare the operator to be pulled from. Must be called before `next`.
    fn open(&mut self) -> Result<()>;

    /// Produce the next output tuple, or `None` once exhausted.
    fn next(&mut self) -> Result<Option<Tuple>>;

    /// Release any resources (pinned pages, temp relations) held open.
    fn close(&mut self) -> Result<()>;

    /// A human-readable, indented rendering of this operator and its
    /// children, for debugging and EXPLAIN-style output.
    fn explain(&self, indent: usize) -> String;

    /// The page the tuple most recently returned by `next` was read from,
    /// if this operator's cursor is meaningfully tied to one. Lets a parent
    /// (e.g. block-nested-loops join) pin the page a child is currently
    /// positioned on without the child exposing its buffer-pool internals.
    /// Defaults to `None` for operators with no notion of a current page.
    fn current_page_id(&self) -> Option<PageId> {
        None
    }
}

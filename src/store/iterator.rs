//! Pull-based cursors returned by partition scans.

use async_trait::async_trait;

use crate::error::{GraphError, Result};
use crate::types::{Edge, Link};

/// Single-pass, forward-only cursor over the records matched by a scan.
///
/// `next` returns `None` both when the results are exhausted and when the
/// cursor hit an error. An error is terminal: every later call to `next`
/// also returns `None`. Check [`error`](Self::error) to tell the two apart.
///
/// Cursors are not restartable, and nothing synchronizes concurrent pulls on
/// the same instance (`next` takes `&mut self`).
#[async_trait]
pub trait GraphIterator<T>: Send {
    /// Pull the next record.
    async fn next(&mut self) -> Option<T>;

    /// The error that terminated iteration, if any.
    fn error(&self) -> Option<&GraphError>;

    /// Give up ownership of the terminal error.
    fn take_error(&mut self) -> Option<GraphError>;
}

/// Cursor over links.
pub type LinkIterator = Box<dyn GraphIterator<Link>>;

/// Cursor over edges.
pub type EdgeIterator = Box<dyn GraphIterator<Edge>>;

/// Drain a cursor into a vector, surfacing a terminal error.
pub async fn collect_all<T: Send>(mut iter: Box<dyn GraphIterator<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    while let Some(item) = iter.next().await {
        out.push(item);
    }

    match iter.take_error() {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

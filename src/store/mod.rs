//! Graph storage backends.

pub mod iterator;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
pub mod conformance;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use crate::error::Result;
use crate::types::{Edge, Link, LinkId};

pub use iterator::{collect_all, EdgeIterator, GraphIterator, LinkIterator};

/// Upper bound on identifier regenerations after a collision.
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Truncate a timestamp to microseconds, the precision `TIMESTAMPTZ` keeps.
///
/// Every backend stores and compares timestamps at this precision, so the
/// same inputs give the same `retrieved_at`/`updated_at` and the same scan
/// results whichever store is behind the trait.
pub fn storage_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Storage contract for the link graph.
///
/// Every backend must give identical results for the same sequence of
/// calls. Callers hold an `Arc<dyn Graph>` and never care which backend
/// sits behind it.
///
/// Range scans cover the half-open interval `[from, to)` under the ordering
/// of [`LinkId`], and only return records whose timestamp is strictly
/// before the cutoff. A scan that matches nothing fails with
/// [`GraphError::EmptyRange`](crate::GraphError::EmptyRange).
///
/// Timestamps are kept at microsecond precision (see [`storage_precision`]).
/// Incoming values and cutoffs with finer precision are truncated.
#[async_trait]
pub trait Graph: Send + Sync {
    /// Insert a link or, if its URL is already stored, advance the stored
    /// `retrieved_at` to the later of the two timestamps.
    async fn upsert_link(&self, link: Link) -> Result<Link>;

    /// Fetch a link by ID.
    async fn find_link(&self, id: LinkId) -> Result<Link>;

    /// Links with `from <= id < to` and `retrieved_at < retrieved_before`.
    async fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator>;

    /// Insert an edge or refresh the `updated_at` of the existing
    /// `(src, dst)` pair to the current time. Both endpoints must exist.
    async fn upsert_edge(&self, edge: Edge) -> Result<Edge>;

    /// Edges with `from <= src < to` and `updated_at < updated_before`.
    async fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator>;

    /// Delete edges sourced at `src` whose `updated_at` is before the cutoff.
    async fn remove_stale_edges(&self, src: LinkId, updated_before: DateTime<Utc>) -> Result<()>;
}

pub use memory::InMemoryGraph;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresGraph};

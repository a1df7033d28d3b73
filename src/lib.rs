//! # link-graph
//!
//! Persistence layer for a distributed web crawler's link graph.
//!
//! The store keeps discovered pages ([`Link`]) and the directed references
//! between them ([`Edge`]), and lets crawler workers claim disjoint slices of
//! the data set to process in parallel.
//!
//! ## Architecture
//!
//! ```text
//! crawler workers ──upsert_link / upsert_edge──▶ Arc<dyn Graph>
//! scheduler ──links / edges over [from, to)───▶   ├─ InMemoryGraph
//!           ──remove_stale_edges─────────────▶   └─ PostgresGraph (feature "postgres")
//! ```
//!
//! ## Guarantees
//!
//! - Exactly one link per URL, exactly one edge per `(src, dst)` pair
//! - `retrieved_at` never moves backward
//! - A scan over `[from, to)` with cutoff `c` returns exactly the records whose
//!   id lies in the range and whose timestamp is strictly before `c`
//! - Both backends behave identically, including the [`GraphError`] kinds

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod store;
pub mod types;

// Re-exports
pub use error::{GraphError, Result};
pub use store::{
    collect_all, storage_precision, EdgeIterator, Graph, GraphIterator, InMemoryGraph,
    LinkIterator, MAX_ID_ATTEMPTS,
};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresGraph};
pub use types::{Edge, EdgeId, Link, LinkId, Partition, Range};

//! Error type shared by every graph backend.

use chrono::{DateTime, Utc};

use crate::types::LinkId;

/// Errors returned by [`Graph`](crate::store::Graph) operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No link with the given id exists.
    #[error("Link not found: {0}")]
    NotFound(LinkId),

    /// A partition scan matched no records.
    #[error("No {kind} in range [{from}, {to}) before {before}")]
    EmptyRange {
        /// Which record type was scanned ("links" or "edges").
        kind: &'static str,
        /// Inclusive lower bound.
        from: LinkId,
        /// Exclusive upper bound.
        to: LinkId,
        /// Timestamp cutoff of the scan.
        before: DateTime<Utc>,
    },

    /// An edge endpoint does not reference an existing link.
    #[error("Invalid edge {src} -> {dst}: endpoint does not exist")]
    InvalidEdge {
        /// Source link.
        src: LinkId,
        /// Destination link.
        dst: LinkId,
    },

    /// Every generated identifier collided with an existing record.
    #[error("Could not generate an unused identifier after {attempts} attempts")]
    IdGeneration {
        /// Number of identifiers tried.
        attempts: usize,
    },

    /// Partition count must be at least one.
    #[error("Partition count must be greater than zero")]
    InvalidPartitionCount,

    /// Storage engine failure.
    #[cfg(feature = "postgres")]
    #[error("Database error during {context}: {source}")]
    Backend {
        /// Operation that failed.
        context: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
}

impl GraphError {
    /// Wrap a driver error with the name of the failing operation.
    #[cfg(feature = "postgres")]
    pub fn backend(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Backend { context, source }
    }
}

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

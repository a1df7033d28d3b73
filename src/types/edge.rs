//! Edge types for the link graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use std::fmt;

use super::link::LinkId;

/// Unique identifier for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(Uuid);

impl EdgeId {
    /// Create a new EdgeId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Whether this is the unassigned (nil) id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EdgeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Directed reference from one link to another.
///
/// Exactly one edge exists per `(src, dst)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Assigned on first creation of the pair.
    pub id: EdgeId,
    /// Source link.
    pub src: LinkId,
    /// Destination link.
    pub dst: LinkId,
    /// Time of the most recent confirmation that the edge still exists.
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Create an unsaved edge. The store assigns the id and timestamp on upsert.
    pub fn new(src: LinkId, dst: LinkId) -> Self {
        Self {
            id: EdgeId::new(Uuid::nil()),
            src,
            dst,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_edge_is_unassigned() {
        let src = LinkId::random();
        let dst = LinkId::random();
        let edge = Edge::new(src, dst);

        assert!(edge.id.is_nil());
        assert_eq!(edge.src, src);
        assert_eq!(edge.dst, dst);
    }

    #[test]
    fn test_edge_serializes_with_ids_as_strings() {
        let edge = Edge::new(LinkId::MIN, LinkId::MAX);
        let json = serde_json::to_value(&edge).unwrap();

        assert_eq!(json["dst"], "ffffffff-ffff-ffff-ffff-ffffffffffff");
        let back: Edge = serde_json::from_value(json).unwrap();
        assert_eq!(back, edge);
    }
}

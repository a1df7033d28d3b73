//! Link types for the link graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a link.
///
/// Wraps a UUID. The derived `Ord` compares the UUID bytes, which is the same
/// order as the lowercase hyphenated string form and the order PostgreSQL and
/// CockroachDB use for `UUID` columns. Range partitioning relies on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(Uuid);

impl LinkId {
    /// Smallest identifier (the nil UUID).
    pub const MIN: LinkId = LinkId(Uuid::nil());

    /// Largest identifier (all bits set).
    ///
    /// Ranges are half-open, so a link with exactly this id is never inside
    /// any range. The random generator never produces it.
    pub const MAX: LinkId = LinkId(Uuid::from_u128(u128::MAX));

    /// Create a new LinkId from a UUID.
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

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LinkId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for LinkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A crawled or discovered URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Assigned by the store on first insert, immutable afterwards.
    pub id: LinkId,
    /// Unique key.
    pub url: String,
    /// Time of the most recent successful crawl. Never moves backward.
    pub retrieved_at: DateTime<Utc>,
}

impl Link {
    /// Create an unsaved link. The store assigns the id on upsert.
    pub fn new(url: impl Into<String>, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            id: LinkId::MIN,
            url: url.into(),
            retrieved_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_order_matches_string_order() {
        let mut ids: Vec<LinkId> = (0..64).map(|_| LinkId::random()).collect();
        let mut strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        ids.sort();
        strings.sort();

        let sorted: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(sorted, strings);
    }

    #[test]
    fn test_bounds() {
        let id = LinkId::random();
        assert!(LinkId::MIN <= id);
        assert!(id < LinkId::MAX);
        assert_eq!(LinkId::MAX.to_string(), "ffffffff-ffff-ffff-ffff-ffffffffffff");
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = LinkId::random();
        let parsed: LinkId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<LinkId>().is_err());
    }

    #[test]
    fn test_new_link_is_unassigned() {
        let link = Link::new("http://example.com", Utc::now());
        assert!(link.id.is_nil());
    }
}

//! Identifier-space partitioning.
//!
//! Workers that scan the graph in parallel each claim one [`Range`]. The
//! ranges produced by [`Partition::split`] are non-overlapping and together
//! cover `[LinkId::MIN, LinkId::MAX)`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::link::LinkId;
use crate::error::{GraphError, Result};

/// Half-open identifier range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive lower bound.
    pub from: LinkId,
    /// Exclusive upper bound.
    pub to: LinkId,
}

impl Range {
    /// Create a range.
    pub fn new(from: LinkId, to: LinkId) -> Self {
        Self { from, to }
    }

    /// The whole identifier space.
    pub fn full() -> Self {
        Self::new(LinkId::MIN, LinkId::MAX)
    }

    /// Whether `id` falls inside this range.
    pub fn contains(&self, id: LinkId) -> bool {
        self.from <= id && id < self.to
    }
}

/// Evenly spaced partitioning of the identifier space.
pub struct Partition;

impl Partition {
    /// Split the identifier space into `count` contiguous ranges.
    pub fn split(count: usize) -> Result<Vec<Range>> {
        if count == 0 {
            return Err(GraphError::InvalidPartitionCount);
        }

        let step = u128::MAX / count as u128;
        let boundary = |i: usize| LinkId::new(Uuid::from_u128(step * i as u128));

        Ok((0..count)
            .map(|i| {
                let to = if i + 1 == count { LinkId::MAX } else { boundary(i + 1) };
                Range::new(boundary(i), to)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_partition_is_full_range() {
        let ranges = Partition::split(1).unwrap();
        assert_eq!(ranges, vec![Range::full()]);
    }

    #[test]
    fn test_zero_partitions_rejected() {
        assert!(matches!(
            Partition::split(0),
            Err(GraphError::InvalidPartitionCount)
        ));
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let ranges = Partition::split(7).unwrap();

        assert_eq!(ranges.len(), 7);
        assert_eq!(ranges[0].from, LinkId::MIN);
        assert_eq!(ranges[6].to, LinkId::MAX);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
            assert!(pair[0].from < pair[0].to);
        }
    }

    #[test]
    fn test_every_id_lands_in_exactly_one_range() {
        let ranges = Partition::split(5).unwrap();

        for _ in 0..256 {
            let id = LinkId::random();
            let hits = ranges.iter().filter(|r| r.contains(id)).count();
            assert_eq!(hits, 1, "id {id} matched {hits} ranges");
        }
    }
}

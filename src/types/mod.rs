//! Core types for the link graph.

pub mod link;
pub mod edge;
pub mod partition;

pub use link::{Link, LinkId};
pub use edge::{Edge, EdgeId};
pub use partition::{Partition, Range};

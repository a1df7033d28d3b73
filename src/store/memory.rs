//! In-memory graph store.
//!
//! One `parking_lot::RwLock` guards the whole index. Mutations take the write
//! lock and reads take the read lock. The graph has to fit in memory, and
//! mutation bursts are short.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::types::{Edge, EdgeId, Link, LinkId};
use super::iterator::{EdgeIterator, GraphIterator, LinkIterator};
use super::{storage_precision, Graph, MAX_ID_ATTEMPTS};

type IdSource = Arc<dyn Fn() -> Uuid + Send + Sync>;

/// All records plus the secondary indexes over them.
#[derive(Debug, Default)]
struct GraphIndex {
    /// Links by ID. Ordered so range scans walk only the requested slice.
    links: BTreeMap<LinkId, Link>,
    /// URL -> link ID.
    links_by_url: HashMap<String, LinkId>,
    /// Edges by ID.
    edges: HashMap<EdgeId, Edge>,
    /// Source link -> outgoing edge IDs.
    link_edges: HashMap<LinkId, Vec<EdgeId>>,
}

/// Process-local graph store.
///
/// Cloning is cheap and every clone shares the same underlying index.
#[derive(Clone)]
pub struct InMemoryGraph {
    index: Arc<RwLock<GraphIndex>>,
    next_id: IdSource,
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("InMemoryGraph")
            .field("links", &index.links.len())
            .field("edges", &index.edges.len())
            .finish()
    }
}

impl InMemoryGraph {
    /// Create a new empty store that assigns random v4 identifiers.
    pub fn new() -> Self {
        Self::with_id_source(Uuid::new_v4)
    }

    /// Create a store that draws identifiers from `source`.
    ///
    /// Mostly useful in tests that need deterministic or colliding ids.
    pub fn with_id_source<F>(source: F) -> Self
    where
        F: Fn() -> Uuid + Send + Sync + 'static,
    {
        Self {
            index: Arc::new(RwLock::new(GraphIndex::default())),
            next_id: Arc::new(source),
        }
    }

    /// Get number of links.
    pub fn link_count(&self) -> usize {
        self.index.read().links.len()
    }

    /// Get number of edges.
    pub fn edge_count(&self) -> usize {
        self.index.read().edges.len()
    }

    /// Draw ids until one is not taken.
    fn fresh_id(&self, taken: impl Fn(Uuid) -> bool) -> Result<Uuid> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.next_id)();
            if !id.is_nil() && !taken(id) {
                return Ok(id);
            }
            tracing::warn!(id = %id, "Generated identifier collides with an existing record");
        }

        Err(GraphError::IdGeneration { attempts: MAX_ID_ATTEMPTS })
    }
}

#[async_trait]
impl Graph for InMemoryGraph {
    async fn upsert_link(&self, link: Link) -> Result<Link> {
        let retrieved_at = storage_precision(link.retrieved_at);
        let mut index = self.index.write();

        if let Some(id) = index.links_by_url.get(&link.url).copied() {
            let existing = index
                .links
                .get_mut(&id)
                .expect("URL index points at a stored link");
            if retrieved_at > existing.retrieved_at {
                existing.retrieved_at = retrieved_at;
            }
            return Ok(existing.clone());
        }

        let id = LinkId::new(self.fresh_id(|id| index.links.contains_key(&LinkId::new(id)))?);
        let stored = Link { id, retrieved_at, ..link };

        tracing::debug!(link_id = %id, url = %stored.url, "Created link");

        index.links_by_url.insert(stored.url.clone(), id);
        index.links.insert(id, stored.clone());

        Ok(stored)
    }

    async fn find_link(&self, id: LinkId) -> Result<Link> {
        self.index
            .read()
            .links
            .get(&id)
            .cloned()
            .ok_or(GraphError::NotFound(id))
    }

    /// Scan links in `[from, to)`.
    ///
    /// The matching ids are captured under one read lock, but each record is
    /// copied out only when the iterator reaches it. A pulled link may show a
    /// `retrieved_at` written after this call returned.
    async fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator> {
        let cutoff = storage_precision(retrieved_before);
        let ids: Vec<LinkId> = if from < to {
            self.index
                .read()
                .links
                .range(from..to)
                .filter(|(_, link)| link.retrieved_at < cutoff)
                .map(|(id, _)| *id)
                .collect()
        } else {
            Vec::new()
        };

        if ids.is_empty() {
            return Err(GraphError::EmptyRange {
                kind: "links",
                from,
                to,
                before: retrieved_before,
            });
        }

        Ok(Box::new(MemoryLinkIterator {
            index: Arc::clone(&self.index),
            ids,
            pos: 0,
        }))
    }

    async fn upsert_edge(&self, edge: Edge) -> Result<Edge> {
        let mut index = self.index.write();

        if !index.links.contains_key(&edge.src) || !index.links.contains_key(&edge.dst) {
            return Err(GraphError::InvalidEdge { src: edge.src, dst: edge.dst });
        }

        let existing = index
            .link_edges
            .get(&edge.src)
            .and_then(|ids| {
                ids.iter()
                    .copied()
                    .find(|id| index.edges.get(id).is_some_and(|e| e.dst == edge.dst))
            });

        if let Some(id) = existing {
            let stored = index
                .edges
                .get_mut(&id)
                .expect("outgoing edge index points at a stored edge");
            stored.updated_at = storage_precision(Utc::now());
            return Ok(stored.clone());
        }

        let id = EdgeId::new(self.fresh_id(|id| index.edges.contains_key(&EdgeId::new(id)))?);
        let stored = Edge {
            id,
            updated_at: storage_precision(Utc::now()),
            ..edge
        };

        tracing::debug!(edge_id = %id, src = %stored.src, dst = %stored.dst, "Created edge");

        index.link_edges.entry(stored.src).or_default().push(id);
        index.edges.insert(id, stored.clone());

        Ok(stored)
    }

    async fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator> {
        let cutoff = storage_precision(updated_before);
        let ids: Vec<EdgeId> = if from < to {
            let index = self.index.read();
            index
                .links
                .range(from..to)
                .filter_map(|(link_id, _)| index.link_edges.get(link_id))
                .flatten()
                .filter(|id| {
                    index
                        .edges
                        .get(*id)
                        .is_some_and(|e| e.updated_at < cutoff)
                })
                .copied()
                .collect()
        } else {
            Vec::new()
        };

        if ids.is_empty() {
            return Err(GraphError::EmptyRange {
                kind: "edges",
                from,
                to,
                before: updated_before,
            });
        }

        Ok(Box::new(MemoryEdgeIterator {
            index: Arc::clone(&self.index),
            ids,
            pos: 0,
        }))
    }

    async fn remove_stale_edges(&self, src: LinkId, updated_before: DateTime<Utc>) -> Result<()> {
        let cutoff = storage_precision(updated_before);
        let mut index = self.index.write();
        let GraphIndex { edges, link_edges, .. } = &mut *index;

        let Some(outgoing) = link_edges.get_mut(&src) else {
            return Ok(());
        };

        let before = outgoing.len();
        outgoing.retain(|id| {
            let stale = edges.get(id).map_or(true, |edge| edge.updated_at < cutoff);
            if stale {
                edges.remove(id);
            }
            !stale
        });
        let removed = before - outgoing.len();

        if outgoing.is_empty() {
            link_edges.remove(&src);
        }

        tracing::debug!(src = %src, removed, "Removed stale edges");
        Ok(())
    }
}

/// Cursor over links captured by [`InMemoryGraph::links`].
struct MemoryLinkIterator {
    index: Arc<RwLock<GraphIndex>>,
    ids: Vec<LinkId>,
    pos: usize,
}

#[async_trait]
impl GraphIterator<Link> for MemoryLinkIterator {
    async fn next(&mut self) -> Option<Link> {
        let index = self.index.read();
        while let Some(id) = self.ids.get(self.pos) {
            self.pos += 1;
            // Links are never deleted, so this only misses on a foreign id.
            if let Some(link) = index.links.get(id) {
                return Some(link.clone());
            }
        }
        None
    }

    fn error(&self) -> Option<&GraphError> {
        None
    }

    fn take_error(&mut self) -> Option<GraphError> {
        None
    }
}

/// Cursor over edges captured by [`InMemoryGraph::edges`].
struct MemoryEdgeIterator {
    index: Arc<RwLock<GraphIndex>>,
    ids: Vec<EdgeId>,
    pos: usize,
}

#[async_trait]
impl GraphIterator<Edge> for MemoryEdgeIterator {
    async fn next(&mut self) -> Option<Edge> {
        let index = self.index.read();
        while let Some(id) = self.ids.get(self.pos) {
            self.pos += 1;
            // Skip edges swept after the scan.
            if let Some(edge) = index.edges.get(id) {
                return Some(edge.clone());
            }
        }
        None
    }

    fn error(&self) -> Option<&GraphError> {
        None
    }

    fn take_error(&mut self) -> Option<GraphError> {
        None
    }
}

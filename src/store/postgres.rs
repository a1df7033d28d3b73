//! PostgreSQL-protocol graph store (PostgreSQL or CockroachDB).
//!
//! Uniqueness and timestamp monotonicity are enforced by the engine through
//! `ON CONFLICT` upserts, so concurrent writers never race on a client-side
//! read-modify-write. Every call issues single statements.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//! - `LINKGRAPH_PAGE_SIZE`: Rows fetched per iterator page (default: 500)

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::types::{Edge, EdgeId, Link, LinkId};
use super::iterator::{EdgeIterator, GraphIterator, LinkIterator};
use super::{storage_precision, Graph, MAX_ID_ATTEMPTS};

/// SQL schema for the links table.
pub const LINKS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS links (
    id UUID NOT NULL,
    url TEXT NOT NULL,
    retrieved_at TIMESTAMPTZ NOT NULL,

    CONSTRAINT links_pkey PRIMARY KEY (id),
    CONSTRAINT links_url_key UNIQUE (url)
);

CREATE INDEX IF NOT EXISTS idx_links_retrieved_at
    ON links(retrieved_at);
"#;

/// SQL schema for the edges table.
pub const EDGES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    id UUID NOT NULL,
    src UUID NOT NULL REFERENCES links(id),
    dst UUID NOT NULL REFERENCES links(id),
    updated_at TIMESTAMPTZ NOT NULL,

    CONSTRAINT edges_pkey PRIMARY KEY (id),
    CONSTRAINT edges_src_dst_key UNIQUE (src, dst)
);

CREATE INDEX IF NOT EXISTS idx_edges_updated_at
    ON edges(updated_at);
"#;

const UPSERT_LINK_QUERY: &str = r#"
INSERT INTO links (id, url, retrieved_at) VALUES ($1, $2, $3)
ON CONFLICT (url) DO UPDATE SET retrieved_at = GREATEST(links.retrieved_at, EXCLUDED.retrieved_at)
RETURNING id, url, retrieved_at
"#;

const FIND_LINK_QUERY: &str = "SELECT id, url, retrieved_at FROM links WHERE id = $1";

const LINKS_PAGE_QUERY: &str = r#"
SELECT id, url, retrieved_at
FROM links
WHERE id >= $1 AND id < $2 AND retrieved_at < $3
ORDER BY id
LIMIT $4
"#;

const UPSERT_EDGE_QUERY: &str = r#"
INSERT INTO edges (id, src, dst, updated_at)
SELECT $1, $2, $3, NOW()
WHERE EXISTS (SELECT 1 FROM links WHERE id = $2)
  AND EXISTS (SELECT 1 FROM links WHERE id = $3)
ON CONFLICT (src, dst) DO UPDATE SET updated_at = NOW()
RETURNING id, src, dst, updated_at
"#;

const EDGES_PAGE_QUERY: &str = r#"
SELECT id, src, dst, updated_at
FROM edges
WHERE (src, id) >= ($1, $2) AND src < $3 AND updated_at < $4
ORDER BY src, id
LIMIT $5
"#;

const REMOVE_STALE_EDGES_QUERY: &str = "DELETE FROM edges WHERE src = $1 AND updated_at < $2";

const FOREIGN_KEY_VIOLATION: &str = "23503";

const DEFAULT_PAGE_SIZE: u32 = 500;

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
    /// Rows fetched per round trip by range iterators (default: 500).
    pub page_size: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Page size from its raw setting. Unset or unparsable means the default,
/// and zero is raised to one.
fn parse_page_size(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .max(1)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:26257/linkgraph".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
            page_size: parse_page_size(std::env::var("LINKGRAPH_PAGE_SIZE").ok().as_deref()),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Graph store backed by a PostgreSQL-protocol database.
///
/// The engine shards and replicates rows itself, so workers in different
/// processes can scan disjoint id ranges concurrently with no coordination
/// beyond agreeing on the range boundaries.
#[derive(Debug, Clone)]
pub struct PostgresGraph {
    pool: PgPool,
    page_size: u32,
}

impl PostgresGraph {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            page_size = config.page_size,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await
            .map_err(GraphError::backend("connect"))?;

        Ok(Self::from_pool(pool, config.page_size))
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, page_size: u32) -> Self {
        Self {
            pool,
            page_size: page_size.max(1),
        }
    }

    /// Create the `links` and `edges` tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.pool
            .execute(LINKS_TABLE_SCHEMA)
            .await
            .map_err(GraphError::backend("create links table"))?;
        self.pool
            .execute(EDGES_TABLE_SCHEMA)
            .await
            .map_err(GraphError::backend("create edges table"))?;

        tracing::info!("Link graph schema ready");
        Ok(())
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn parse_link_row(row: &PgRow) -> std::result::Result<Link, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let url: String = row.try_get("url")?;
        let retrieved_at: DateTime<Utc> = row.try_get("retrieved_at")?;

        Ok(Link {
            id: LinkId::new(id),
            url,
            retrieved_at,
        })
    }

    fn parse_edge_row(row: &PgRow) -> std::result::Result<Edge, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let src: Uuid = row.try_get("src")?;
        let dst: Uuid = row.try_get("dst")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(Edge {
            id: EdgeId::new(id),
            src: LinkId::new(src),
            dst: LinkId::new(dst),
            updated_at,
        })
    }

    fn iterator<S: PageSource>(&self, source: S) -> PagedIterator<S> {
        PagedIterator {
            pool: self.pool.clone(),
            source,
            page: VecDeque::new(),
            page_size: i64::from(self.page_size),
            done: false,
            err: None,
        }
    }
}

/// Whether `err` is a unique violation on the primary-key constraint `pkey`.
fn is_id_collision(err: &sqlx::Error, pkey: &str) -> bool {
    err.as_database_error().is_some_and(|db| {
        db.code().as_deref() == Some("23505")
            && (db.constraint() == Some(pkey) || db.message().contains(pkey))
    })
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

#[async_trait]
impl Graph for PostgresGraph {
    async fn upsert_link(&self, link: Link) -> Result<Link> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Uuid::new_v4();
            let result = sqlx::query(UPSERT_LINK_QUERY)
                .bind(id)
                .bind(&link.url)
                .bind(storage_precision(link.retrieved_at))
                .fetch_one(&self.pool)
                .await;

            match result {
                Ok(row) => {
                    let stored = Self::parse_link_row(&row)
                        .map_err(GraphError::backend("decode upserted link"))?;
                    if stored.id.as_uuid() == id {
                        tracing::debug!(link_id = %stored.id, url = %stored.url, "Created link");
                    }
                    return Ok(stored);
                }
                Err(err) if is_id_collision(&err, "links_pkey") => {
                    tracing::warn!(id = %id, "Generated link id collides with an existing record");
                }
                Err(err) => return Err(GraphError::backend("upsert link")(err)),
            }
        }

        Err(GraphError::IdGeneration { attempts: MAX_ID_ATTEMPTS })
    }

    async fn find_link(&self, id: LinkId) -> Result<Link> {
        let row = sqlx::query(FIND_LINK_QUERY)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(GraphError::backend("find link"))?;

        match row {
            Some(ref r) => Self::parse_link_row(r).map_err(GraphError::backend("decode link")),
            None => Err(GraphError::NotFound(id)),
        }
    }

    async fn links(
        &self,
        from: LinkId,
        to: LinkId,
        retrieved_before: DateTime<Utc>,
    ) -> Result<LinkIterator> {
        let mut iter = self.iterator(LinkPages {
            cursor: from,
            to,
            before: retrieved_before,
        });

        if !iter.prefetch().await? {
            return Err(GraphError::EmptyRange {
                kind: "links",
                from,
                to,
                before: retrieved_before,
            });
        }

        Ok(Box::new(iter))
    }

    async fn upsert_edge(&self, edge: Edge) -> Result<Edge> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Uuid::new_v4();
            let result = sqlx::query(UPSERT_EDGE_QUERY)
                .bind(id)
                .bind(edge.src.as_uuid())
                .bind(edge.dst.as_uuid())
                .fetch_optional(&self.pool)
                .await;

            match result {
                Ok(Some(row)) => {
                    return Self::parse_edge_row(&row)
                        .map_err(GraphError::backend("decode upserted edge"));
                }
                // The EXISTS guard filtered the insert out.
                Ok(None) => return Err(GraphError::InvalidEdge { src: edge.src, dst: edge.dst }),
                Err(err) if is_foreign_key_violation(&err) => {
                    return Err(GraphError::InvalidEdge { src: edge.src, dst: edge.dst });
                }
                Err(err) if is_id_collision(&err, "edges_pkey") => {
                    tracing::warn!(id = %id, "Generated edge id collides with an existing record");
                }
                Err(err) => return Err(GraphError::backend("upsert edge")(err)),
            }
        }

        Err(GraphError::IdGeneration { attempts: MAX_ID_ATTEMPTS })
    }

    async fn edges(
        &self,
        from: LinkId,
        to: LinkId,
        updated_before: DateTime<Utc>,
    ) -> Result<EdgeIterator> {
        let mut iter = self.iterator(EdgePages {
            cursor: (from.as_uuid(), Uuid::nil()),
            to,
            before: updated_before,
        });

        if !iter.prefetch().await? {
            return Err(GraphError::EmptyRange {
                kind: "edges",
                from,
                to,
                before: updated_before,
            });
        }

        Ok(Box::new(iter))
    }

    async fn remove_stale_edges(&self, src: LinkId, updated_before: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(REMOVE_STALE_EDGES_QUERY)
            .bind(src.as_uuid())
            .bind(storage_precision(updated_before))
            .execute(&self.pool)
            .await
            .map_err(GraphError::backend("remove stale edges"))?;

        tracing::debug!(src = %src, removed = result.rows_affected(), "Removed stale edges");
        Ok(())
    }
}

/// One keyset-paginated query. Each call fetches the page after the
/// previous one and advances the cursor past its last row.
#[async_trait]
trait PageSource: Send + 'static {
    type Item: Send + 'static;

    async fn fetch(&mut self, pool: &PgPool, limit: i64) -> Result<Vec<Self::Item>>;
}

/// Smallest UUID strictly greater than `id`.
fn successor(id: Uuid) -> Option<Uuid> {
    id.as_u128().checked_add(1).map(Uuid::from_u128)
}

struct LinkPages {
    cursor: LinkId,
    to: LinkId,
    before: DateTime<Utc>,
}

#[async_trait]
impl PageSource for LinkPages {
    type Item = Link;

    async fn fetch(&mut self, pool: &PgPool, limit: i64) -> Result<Vec<Link>> {
        let rows = sqlx::query(LINKS_PAGE_QUERY)
            .bind(self.cursor.as_uuid())
            .bind(self.to.as_uuid())
            .bind(storage_precision(self.before))
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(GraphError::backend("scan links"))?;

        let links = rows
            .iter()
            .map(PostgresGraph::parse_link_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(GraphError::backend("decode link"))?;

        if let Some(next) = links.last().and_then(|l| successor(l.id.as_uuid())) {
            self.cursor = LinkId::new(next);
        }
        Ok(links)
    }
}

struct EdgePages {
    /// Resume position as `(src, id)`.
    cursor: (Uuid, Uuid),
    to: LinkId,
    before: DateTime<Utc>,
}

#[async_trait]
impl PageSource for EdgePages {
    type Item = Edge;

    async fn fetch(&mut self, pool: &PgPool, limit: i64) -> Result<Vec<Edge>> {
        let rows = sqlx::query(EDGES_PAGE_QUERY)
            .bind(self.cursor.0)
            .bind(self.cursor.1)
            .bind(self.to.as_uuid())
            .bind(storage_precision(self.before))
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(GraphError::backend("scan edges"))?;

        let edges = rows
            .iter()
            .map(PostgresGraph::parse_edge_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(GraphError::backend("decode edge"))?;

        if let Some(last) = edges.last() {
            self.cursor = match successor(last.id.as_uuid()) {
                Some(next) => (last.src.as_uuid(), next),
                None => (successor(last.src.as_uuid()).unwrap_or(last.src.as_uuid()), Uuid::nil()),
            };
        }
        Ok(edges)
    }
}

/// Cursor that pulls pages from a [`PageSource`] on demand.
struct PagedIterator<S: PageSource> {
    pool: PgPool,
    source: S,
    page: VecDeque<S::Item>,
    page_size: i64,
    done: bool,
    err: Option<GraphError>,
}

impl<S: PageSource> PagedIterator<S> {
    /// Load the next page. Returns whether any row arrived.
    async fn prefetch(&mut self) -> Result<bool> {
        let rows = self.source.fetch(&self.pool, self.page_size).await?;
        if (rows.len() as i64) < self.page_size {
            self.done = true;
        }
        let any = !rows.is_empty();
        self.page.extend(rows);
        Ok(any)
    }
}

#[async_trait]
impl<S: PageSource> GraphIterator<S::Item> for PagedIterator<S> {
    async fn next(&mut self) -> Option<S::Item> {
        if let Some(item) = self.page.pop_front() {
            return Some(item);
        }
        if self.done {
            return None;
        }

        match self.prefetch().await {
            Ok(_) => self.page.pop_front(),
            Err(err) => {
                tracing::warn!(error = %err, "Range scan aborted");
                self.done = true;
                self.err = Some(err);
                None
            }
        }
    }

    fn error(&self) -> Option<&GraphError> {
        self.err.as_ref()
    }

    fn take_error(&mut self) -> Option<GraphError> {
        self.err.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor() {
        assert_eq!(successor(Uuid::nil()), Some(Uuid::from_u128(1)));
        assert_eq!(successor(Uuid::from_u128(u128::MAX)), None);
    }

    #[test]
    fn test_schema_names_constraints_used_for_collision_detection() {
        assert!(LINKS_TABLE_SCHEMA.contains("CONSTRAINT links_pkey PRIMARY KEY (id)"));
        assert!(EDGES_TABLE_SCHEMA.contains("CONSTRAINT edges_pkey PRIMARY KEY (id)"));
        assert!(EDGES_TABLE_SCHEMA.contains("UNIQUE (src, dst)"));
    }

    #[test]
    fn test_parse_page_size() {
        assert_eq!(parse_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("not-a-number")), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("25")), 25);
        assert_eq!(parse_page_size(Some("0")), 1);
    }

    #[tokio::test]
    async fn test_from_pool_never_uses_zero_page_size() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost:26257/linkgraph")
            .unwrap();
        let graph = PostgresGraph::from_pool(pool, 0);

        assert_eq!(graph.page_size, 1);
    }
}

//! End-to-end crawler scenarios against the in-memory backend.
//!
//! These walk through the fetch → schedule → sweep cycle the way crawler
//! workers and the scheduler drive the store, through `Arc<dyn Graph>`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use link_graph::{collect_all, storage_precision, Edge, Graph, GraphError, InMemoryGraph, Link, LinkId, Partition};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn graph() -> Arc<dyn Graph> {
    Arc::new(InMemoryGraph::new())
}

async fn scan_links(graph: &dyn Graph, from: LinkId, to: LinkId, before: chrono::DateTime<Utc>) -> Vec<Link> {
    match graph.links(from, to, before).await {
        Ok(iter) => collect_all(iter).await.unwrap(),
        Err(GraphError::EmptyRange { .. }) => Vec::new(),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

async fn scan_edges(graph: &dyn Graph, from: LinkId, to: LinkId, before: chrono::DateTime<Utc>) -> Vec<Edge> {
    match graph.edges(from, to, before).await {
        Ok(iter) => collect_all(iter).await.unwrap(),
        Err(GraphError::EmptyRange { .. }) => Vec::new(),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_recrawl_advances_retrieved_at() {
    let graph = graph();
    let t0 = storage_precision(Utc::now() - Duration::hours(1));
    let t1 = t0 + Duration::minutes(30);

    let first = graph.upsert_link(Link::new("http://a", t0)).await.unwrap();
    let second = graph.upsert_link(Link::new("http://a", t1)).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.retrieved_at, t1);
}

#[tokio::test]
async fn test_reconfirmed_edge_keeps_identity() {
    let graph = graph();
    let a = graph.upsert_link(Link::new("http://a", Utc::now())).await.unwrap();
    let b = graph.upsert_link(Link::new("http://b", Utc::now())).await.unwrap();

    let first = graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(2)).await;
    let second = graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();

    assert_eq!(second.id, first.id);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn test_edge_to_unknown_link_rejected() {
    let graph = graph();
    let a = graph.upsert_link(Link::new("http://a", Utc::now())).await.unwrap();

    let result = graph.upsert_edge(Edge::new(a.id, LinkId::random())).await;
    assert!(matches!(result, Err(GraphError::InvalidEdge { src, .. }) if src == a.id));
}

#[tokio::test]
async fn test_scheduler_finds_due_links() {
    let graph = graph();
    let t1 = Utc::now();
    let x = graph.upsert_link(Link::new("http://x", t1)).await.unwrap();

    let due = scan_links(graph.as_ref(), LinkId::MIN, LinkId::MAX, t1 + Duration::seconds(1)).await;
    assert_eq!(due, vec![x.clone()]);

    // Nothing is stored below x.
    let result = graph.links(LinkId::MIN, x.id, t1 + Duration::seconds(1)).await;
    assert!(matches!(result, Err(GraphError::EmptyRange { .. })));
}

#[tokio::test]
async fn test_sweep_drops_unconfirmed_edges() {
    let graph = graph();
    let a = graph.upsert_link(Link::new("http://a", Utc::now())).await.unwrap();
    let b = graph.upsert_link(Link::new("http://b", Utc::now())).await.unwrap();
    graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(2)).await;
    graph.remove_stale_edges(a.id, Utc::now()).await.unwrap();

    let remaining = scan_edges(graph.as_ref(), a.id, LinkId::MAX, Utc::now() + Duration::hours(1)).await;
    assert!(remaining.iter().all(|e| e.src != a.id));
}

#[tokio::test]
async fn test_full_crawl_cycle_over_partitions() {
    let graph = graph();
    let stale = Utc::now() - Duration::days(1);

    let mut pages = Vec::new();
    for i in 0..20 {
        pages.push(graph.upsert_link(Link::new(format!("http://site/{i}"), stale)).await.unwrap());
    }
    for pair in pages.windows(2) {
        graph.upsert_edge(Edge::new(pair[0].id, pair[1].id)).await.unwrap();
    }

    let crawl_started = Utc::now();
    tokio::time::sleep(StdDuration::from_millis(2)).await;

    // Each worker re-crawls its partition, reconfirming only forward edges
    // from even pages.
    let ranges = Partition::split(3).unwrap();
    let mut visited = 0;
    for range in &ranges {
        for link in scan_links(graph.as_ref(), range.from, range.to, crawl_started).await {
            assert!(range.contains(link.id));
            visited += 1;

            graph.upsert_link(Link::new(link.url.clone(), Utc::now())).await.unwrap();
            let index = pages.iter().position(|p| p.id == link.id).unwrap();
            if index % 2 == 0 && index + 1 < pages.len() {
                graph.upsert_edge(Edge::new(link.id, pages[index + 1].id)).await.unwrap();
            }
            graph.remove_stale_edges(link.id, crawl_started).await.unwrap();
        }
    }
    assert_eq!(visited, pages.len());

    // Nothing is due any more.
    let due = scan_links(graph.as_ref(), LinkId::MIN, LinkId::MAX, crawl_started).await;
    assert!(due.is_empty());

    // Only the reconfirmed edges survive.
    let edges = scan_edges(graph.as_ref(), LinkId::MIN, LinkId::MAX, Utc::now() + Duration::hours(1)).await;
    assert_eq!(edges.len(), 10);
    for edge in edges {
        let index = pages.iter().position(|p| p.id == edge.src).unwrap();
        assert_eq!(index % 2, 0);
        assert!(edge.updated_at >= crawl_started);
    }
}

//! Behaviour every [`Graph`] backend must share.
//!
//! Each check takes a `&dyn Graph`, creates its own uniquely named links and
//! scopes its scans to the ids it created, so the suite can run against a
//! database that already holds data. Checks panic on failure.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::time::Duration as StdDuration;
use uuid::Uuid;

use crate::error::GraphError;
use crate::types::{Edge, Link, LinkId};
use super::{collect_all, Graph};

/// Run every check in sequence.
pub async fn run_all(graph: &dyn Graph) {
    upsert_new_link(graph).await;
    upsert_existing_link(graph).await;
    retrieved_at_is_monotonic(graph).await;
    timestamps_use_microsecond_precision(graph).await;
    find_missing_link(graph).await;
    links_in_partition(graph).await;
    links_empty_range(graph).await;
    upsert_edge_refreshes(graph).await;
    upsert_edge_rejects_unknown_endpoint(graph).await;
    edges_in_partition(graph).await;
    remove_stale_edges(graph).await;
}

/// Whole-second timestamp, so backends with microsecond precision round-trip it.
fn base_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0) - Duration::hours(1)
}

fn unique_url(tag: &str) -> String {
    format!("https://conformance.test/{tag}/{}", Uuid::new_v4())
}

/// Smallest id strictly greater than `id`.
fn successor(id: LinkId) -> LinkId {
    LinkId::new(Uuid::from_u128(id.as_uuid().as_u128().saturating_add(1)))
}

async fn tick() {
    tokio::time::sleep(StdDuration::from_millis(5)).await;
}

/// A new URL gets a fresh id that `find_link` resolves.
pub async fn upsert_new_link(graph: &dyn Graph) {
    let url = unique_url("new");
    let t0 = base_time();

    let link = graph.upsert_link(Link::new(url.clone(), t0)).await.unwrap();
    assert!(!link.id.is_nil(), "store must assign an id");
    assert_eq!(link.url, url);
    assert_eq!(link.retrieved_at, t0);

    let found = graph.find_link(link.id).await.unwrap();
    assert_eq!(found, link);
}

/// Re-upserting a URL keeps its id and advances `retrieved_at`.
pub async fn upsert_existing_link(graph: &dyn Graph) {
    let url = unique_url("existing");
    let t0 = base_time();
    let t1 = t0 + Duration::minutes(1);

    let first = graph.upsert_link(Link::new(url.clone(), t0)).await.unwrap();
    let second = graph.upsert_link(Link::new(url.clone(), t1)).await.unwrap();

    assert_eq!(second.id, first.id, "link id changed while upserting");
    assert_eq!(second.retrieved_at, t1);

    // Upserting the returned value again is a no-op.
    let third = graph.upsert_link(second.clone()).await.unwrap();
    assert_eq!(third, second);
}

/// An older timestamp never moves `retrieved_at` backward.
pub async fn retrieved_at_is_monotonic(graph: &dyn Graph) {
    let url = unique_url("monotonic");
    let t0 = base_time();
    let t1 = t0 + Duration::minutes(1);

    let newer = graph.upsert_link(Link::new(url.clone(), t1)).await.unwrap();
    let older = graph.upsert_link(Link::new(url.clone(), t0)).await.unwrap();

    assert_eq!(older.id, newer.id);
    assert_eq!(older.retrieved_at, t1);
    assert_eq!(graph.find_link(newer.id).await.unwrap().retrieved_at, t1);
}

/// Sub-microsecond digits are dropped on write and on scan cutoffs.
pub async fn timestamps_use_microsecond_precision(graph: &dyn Graph) {
    let base = base_time();
    let link = graph
        .upsert_link(Link::new(unique_url("precision"), base + Duration::nanoseconds(1_234_567)))
        .await
        .unwrap();
    assert_eq!(link.retrieved_at, base + Duration::microseconds(1_234));

    let result = graph
        .links(link.id, successor(link.id), base + Duration::nanoseconds(1_234_900))
        .await;
    assert!(
        matches!(result, Err(GraphError::EmptyRange { .. })),
        "cutoff truncates to the stored value and excludes it"
    );

    let iter = graph
        .links(link.id, successor(link.id), base + Duration::microseconds(1_235))
        .await
        .unwrap();
    assert_eq!(collect_all(iter).await.unwrap(), vec![link]);
}

/// Unknown ids fail with `NotFound`.
pub async fn find_missing_link(graph: &dyn Graph) {
    let missing = LinkId::random();
    match graph.find_link(missing).await {
        Err(GraphError::NotFound(id)) => assert_eq!(id, missing),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

/// A scan returns exactly the links inside `[from, to)` retrieved before the cutoff.
pub async fn links_in_partition(graph: &dyn Graph) {
    let t0 = base_time();
    let mut created = Vec::new();
    for i in 0..3 {
        let link = Link::new(unique_url("partition"), t0 + Duration::minutes(i));
        created.push(graph.upsert_link(link).await.unwrap());
    }

    for link in &created {
        let iter = graph
            .links(link.id, successor(link.id), link.retrieved_at + Duration::seconds(1))
            .await
            .unwrap();
        let got = collect_all(iter).await.unwrap();
        assert_eq!(got, vec![link.clone()]);

        // The cutoff is exclusive.
        let exact = graph.links(link.id, successor(link.id), link.retrieved_at).await;
        assert!(
            matches!(exact, Err(GraphError::EmptyRange { .. })),
            "link retrieved exactly at the cutoff must be excluded"
        );
    }

    // A full-range scan with a cutoff between the timestamps splits them.
    let cutoff = t0 + Duration::seconds(90);
    let iter = graph.links(LinkId::MIN, LinkId::MAX, cutoff).await.unwrap();
    let got = collect_all(iter).await.unwrap();
    assert!(got.iter().all(|l| l.retrieved_at < cutoff));
    assert!(got.iter().any(|l| l.id == created[0].id));
    assert!(got.iter().any(|l| l.id == created[1].id));
    assert!(!got.iter().any(|l| l.id == created[2].id));
}

/// Scans that match nothing fail with `EmptyRange`.
pub async fn links_empty_range(graph: &dyn Graph) {
    let link = graph
        .upsert_link(Link::new(unique_url("empty"), base_time()))
        .await
        .unwrap();

    let after = successor(link.id);
    let result = graph.links(after, successor(after), Utc::now()).await;
    assert!(matches!(result, Err(GraphError::EmptyRange { kind: "links", .. })));

    let result = graph.edges(after, successor(after), Utc::now()).await;
    assert!(matches!(result, Err(GraphError::EmptyRange { kind: "edges", .. })));
}

/// Re-upserting an edge keeps its id and refreshes `updated_at`.
pub async fn upsert_edge_refreshes(graph: &dyn Graph) {
    let a = graph.upsert_link(Link::new(unique_url("src"), base_time())).await.unwrap();
    let b = graph.upsert_link(Link::new(unique_url("dst"), base_time())).await.unwrap();

    let first = graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();
    assert!(!first.id.is_nil());
    assert_eq!((first.src, first.dst), (a.id, b.id));

    tick().await;
    let second = graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();

    assert_eq!(second.id, first.id, "edge id changed while upserting");
    assert!(second.updated_at > first.updated_at);
}

/// Edges must point between existing links.
pub async fn upsert_edge_rejects_unknown_endpoint(graph: &dyn Graph) {
    let a = graph.upsert_link(Link::new(unique_url("valid"), base_time())).await.unwrap();
    let ghost = LinkId::random();

    let result = graph.upsert_edge(Edge::new(a.id, ghost)).await;
    assert!(matches!(result, Err(GraphError::InvalidEdge { .. })));

    let result = graph.upsert_edge(Edge::new(ghost, a.id)).await;
    assert!(matches!(result, Err(GraphError::InvalidEdge { .. })));
}

/// An edge scan selects by source id and exclusive `updated_at` cutoff.
pub async fn edges_in_partition(graph: &dyn Graph) {
    let a = graph.upsert_link(Link::new(unique_url("a"), base_time())).await.unwrap();
    let b = graph.upsert_link(Link::new(unique_url("b"), base_time())).await.unwrap();
    let c = graph.upsert_link(Link::new(unique_url("c"), base_time())).await.unwrap();

    let ab = graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();
    let ac = graph.upsert_edge(Edge::new(a.id, c.id)).await.unwrap();
    let bc = graph.upsert_edge(Edge::new(b.id, c.id)).await.unwrap();

    let latest = ab.updated_at.max(ac.updated_at);
    let iter = graph
        .edges(a.id, successor(a.id), latest + Duration::seconds(1))
        .await
        .unwrap();
    let mut got = collect_all(iter).await.unwrap();
    got.sort_by_key(|e| e.id);

    let mut expected = vec![ab.clone(), ac.clone()];
    expected.sort_by_key(|e| e.id);
    assert_eq!(got, expected);

    let iter = graph
        .edges(b.id, successor(b.id), bc.updated_at + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(collect_all(iter).await.unwrap(), vec![bc.clone()]);

    let earliest = ab.updated_at.min(ac.updated_at);
    let result = graph.edges(a.id, successor(a.id), earliest).await;
    assert!(matches!(result, Err(GraphError::EmptyRange { .. })));
}

/// Sweeping removes only the source's edges older than the cutoff.
pub async fn remove_stale_edges(graph: &dyn Graph) {
    let a = graph.upsert_link(Link::new(unique_url("sweep-a"), base_time())).await.unwrap();
    let b = graph.upsert_link(Link::new(unique_url("sweep-b"), base_time())).await.unwrap();
    let c = graph.upsert_link(Link::new(unique_url("sweep-c"), base_time())).await.unwrap();

    let ab = graph.upsert_edge(Edge::new(a.id, b.id)).await.unwrap();
    graph.upsert_edge(Edge::new(a.id, c.id)).await.unwrap();
    let bc = graph.upsert_edge(Edge::new(b.id, c.id)).await.unwrap();

    tick().await;
    let ac = graph.upsert_edge(Edge::new(a.id, c.id)).await.unwrap();
    assert!(ab.updated_at < ac.updated_at);

    // a->b is stale, the refreshed a->c sits exactly at the cutoff.
    let cutoff = ac.updated_at;
    graph.remove_stale_edges(a.id, cutoff).await.unwrap();
    graph.remove_stale_edges(a.id, cutoff).await.unwrap();

    let far = ac.updated_at + Duration::hours(1);
    let iter = graph.edges(a.id, successor(a.id), far).await.unwrap();
    assert_eq!(collect_all(iter).await.unwrap(), vec![ac.clone()]);

    let iter = graph.edges(b.id, successor(b.id), far).await.unwrap();
    assert_eq!(collect_all(iter).await.unwrap(), vec![bc]);

    graph.remove_stale_edges(a.id, far).await.unwrap();
    let result = graph.edges(a.id, successor(a.id), far).await;
    assert!(matches!(result, Err(GraphError::EmptyRange { .. })));
}

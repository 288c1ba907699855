//! Text indexes spread over several nodes of an in-process cluster

mod common;

use common::*;
use project_text_index::cluster::{LocalCluster, LocalClusterNode, NodeAddress};
use project_text_index::config::Config;
use project_text_index::search::{LocalTextIndex, ProjectTextManager};
use project_text_index::state::InMemoryEntityStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

struct Member {
    _site: TempDir,
    config: Config,
    node: TestNode,
    issues: Arc<ProjectTextManager<Issue>>,
}

impl Member {
    fn start(node: Arc<LocalClusterNode>, store: &Arc<InMemoryEntityStore<Issue>>) -> Self {
        let site = TempDir::new().unwrap();
        let mut config = test_config(site.path());
        config.cluster.fanout_timeout_ms = 300;

        let node = TestNode::new(node, &config);
        let issues = node.start_index(issue_index_config("Issue", 1), &config, store.clone());
        Self {
            _site: site,
            config,
            node,
            issues,
        }
    }

    fn address(&self) -> &NodeAddress {
        self.node.node.address()
    }
}

/// Projects 1 and 2 owned by the first and second node respectively
async fn two_nodes() -> (Arc<LocalCluster>, Member, Member) {
    let cluster = LocalCluster::new();
    let store = store_with(sample_issues());

    let node_a = cluster.join("node-a:5710");
    let node_b = cluster.join("node-b:5710");
    cluster.assign_project(1, node_a.address());
    cluster.assign_project(2, node_b.address());

    let a = Member::start(node_a, &store);
    let b = Member::start(node_b, &store);
    a.node.settle().await;
    b.node.settle().await;

    (cluster, a, b)
}

#[tokio::test]
async fn test_each_project_indexed_by_its_owner_only() {
    let (_cluster, a, b) = two_nodes().await;

    assert_eq!(a.issues.local_count("*:*").unwrap(), 2);
    assert_eq!(b.issues.local_count("project_id:1").unwrap(), 0);
    assert_eq!(b.issues.local_count("project_id:2").unwrap(), 2);

    // Both nodes scanned the whole store
    assert_eq!(a.issues.stats().unwrap().progress_mark, 4);
    assert_eq!(b.issues.stats().unwrap().progress_mark, 4);
}

#[tokio::test]
async fn test_queries_cover_every_node() {
    let (_cluster, a, b) = two_nodes().await;

    assert_eq!(a.issues.count("*:*").await.unwrap(), 4);
    assert_eq!(b.issues.count("crash").await.unwrap(), 2);

    let mut found = ids(&a.issues.search("crash", 0, 10).await.unwrap());
    found.sort_unstable();
    assert_eq!(found, vec![1, 3]);

    let page: Vec<u64> = ids(&b.issues.search("*:*", 0, 3).await.unwrap());
    assert_eq!(page.len(), 3);
}

#[tokio::test]
async fn test_unreachable_node_is_skipped() {
    let (cluster, a, b) = two_nodes().await;
    cluster.set_reachable(b.address(), false);

    assert_eq!(a.issues.count("*:*").await.unwrap(), 2);
    assert_eq!(ids(&a.issues.search("crash", 0, 10).await.unwrap()), vec![1]);

    cluster.set_reachable(b.address(), true);
    assert_eq!(a.issues.count("*:*").await.unwrap(), 4);
}

#[tokio::test]
async fn test_slow_node_is_cut_off() {
    let (cluster, a, b) = two_nodes().await;
    cluster.set_delay(b.address(), Some(Duration::from_secs(3)));

    let started = Instant::now();
    assert_eq!(a.issues.count("*:*").await.unwrap(), 2);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(a.config.cluster.fanout_timeout() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_departed_node_is_not_queried() {
    let (cluster, a, b) = two_nodes().await;
    cluster.leave(b.address());

    assert_eq!(a.issues.count("crash").await.unwrap(), 1);
    assert_eq!(cluster.members(), vec![a.address().clone()]);
}

#[tokio::test]
async fn test_node_without_index_does_not_fail_queries() {
    let (cluster, a, _b) = two_nodes().await;

    let site = TempDir::new().unwrap();
    let bare = TestNode::new(cluster.join("node-c:5710"), &test_config(site.path()));
    assert!(bare.registry.index_names().is_empty());

    assert_eq!(a.issues.count("*:*").await.unwrap(), 4);
}

#[tokio::test]
async fn test_project_deletion_reaches_owner_and_stays_in_index() {
    let (_cluster, a, b) = two_nodes().await;
    let store = store_with(sample_issues());

    let a_pulls = a
        .node
        .start_index(issue_index_config("PullRequest", 1), &a.config, store.clone());
    let b_pulls = b
        .node
        .start_index(issue_index_config("PullRequest", 1), &b.config, store.clone());
    a.node.settle().await;
    b.node.settle().await;
    assert_eq!(a_pulls.count("*:*").await.unwrap(), 4);

    // Requested on the node that does not hold project 2
    a.issues.on_project_deleted(2).await.unwrap();

    assert_eq!(b.issues.local_count("*:*").unwrap(), 0);
    assert_eq!(a.issues.count("*:*").await.unwrap(), 2);
    assert_eq!(b_pulls.local_count("project_id:2").unwrap(), 2);
    assert_eq!(a_pulls.count("*:*").await.unwrap(), 4);
}

#[tokio::test]
async fn test_reassigned_project_is_indexed_on_request() {
    let (cluster, a, b) = two_nodes().await;
    cluster.assign_project(2, a.address());

    a.issues.request_index_ids(&[3, 4]);
    a.node.settle().await;
    b.issues.delete_entities(&[3, 4]).unwrap();

    assert_eq!(a.issues.local_count("*:*").unwrap(), 4);
    assert_eq!(b.issues.count("*:*").await.unwrap(), 4);
    assert!(Arc::ptr_eq(a.node.node.cluster(), &cluster));
}

//! Batch work pool behaviour and resumable catch-up indexing

mod common;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use project_text_index::cluster::LocalCluster;
use project_text_index::scheduler::{
    BatchWorkManager, BatchWorker, IndexWork, SchedulerError, SchedulerResult,
};
use std::sync::Arc;
use tempfile::TempDir;

type BatchLog = Arc<Mutex<Vec<(String, Vec<IndexWork>)>>>;

/// Records every batch it receives into a log shared between workers
struct Recorder {
    name: String,
    priority: u32,
    log: BatchLog,
}

impl Recorder {
    fn new(name: &str, priority: u32, log: &BatchLog) -> Arc<dyn BatchWorker> {
        Arc::new(Self {
            name: name.to_string(),
            priority,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl BatchWorker for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn do_works(&self, mut works: Vec<IndexWork>) -> SchedulerResult<()> {
        works.sort_by_key(|work| match work {
            IndexWork::Entity(id) => *id,
            IndexWork::Scan => u64::MAX,
        });
        self.log.lock().push((self.name.clone(), works));
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl BatchWorker for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn priority(&self) -> u32 {
        10
    }

    async fn do_works(&self, _works: Vec<IndexWork>) -> SchedulerResult<()> {
        Err(SchedulerError::BatchFailed("store offline".to_string()))
    }
}

#[tokio::test]
async fn test_duplicate_work_is_collapsed() {
    let log: BatchLog = Arc::new(Mutex::new(Vec::new()));
    let manager = BatchWorkManager::new(1);
    let worker = Recorder::new("issues", 20, &log);

    manager.submit(&worker, IndexWork::Entity(7)).unwrap();
    manager.submit(&worker, IndexWork::Entity(7)).unwrap();
    manager.submit(&worker, IndexWork::Scan).unwrap();
    manager.submit(&worker, IndexWork::Scan).unwrap();
    assert_eq!(manager.pending_count("issues"), 2);

    manager.wait_until_idle().await;

    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, vec![IndexWork::Entity(7), IndexWork::Scan]);
    drop(log);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_lower_priority_value_runs_first() {
    let log: BatchLog = Arc::new(Mutex::new(Vec::new()));
    let manager = BatchWorkManager::new(1);
    let background = Recorder::new("background", 50, &log);
    let urgent = Recorder::new("urgent", 5, &log);

    manager.submit(&background, IndexWork::Scan).unwrap();
    manager.submit(&urgent, IndexWork::Entity(1)).unwrap();
    manager.wait_until_idle().await;

    let order: Vec<String> = log.lock().iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(order, vec!["urgent".to_string(), "background".to_string()]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_batch_does_not_block_others() {
    let log: BatchLog = Arc::new(Mutex::new(Vec::new()));
    let manager = BatchWorkManager::new(1);
    let failing: Arc<dyn BatchWorker> = Arc::new(Failing);
    let recorder = Recorder::new("recorder", 20, &log);

    manager.submit(&failing, IndexWork::Scan).unwrap();
    manager.submit(&recorder, IndexWork::Entity(3)).unwrap();
    manager.wait_until_idle().await;

    assert_eq!(log.lock().len(), 1);
    assert_eq!(manager.pending_count("failing"), 0);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_submit_rejected_after_shutdown() {
    let log: BatchLog = Arc::new(Mutex::new(Vec::new()));
    let manager = BatchWorkManager::new(2);
    let worker = Recorder::new("issues", 20, &log);
    manager.shutdown().await;

    assert!(matches!(
        manager.submit(&worker, IndexWork::Scan),
        Err(SchedulerError::ShutDown)
    ));
}

#[tokio::test]
async fn test_scan_runs_in_batches_until_caught_up() {
    let site = TempDir::new().unwrap();
    let mut config = test_config(site.path());
    config.indexing.batch_size = 2;

    let issues: Vec<Issue> = (1..=5)
        .map(|id| issue(id, 1, &format!("Issue number {}", id), "Flaky test"))
        .collect();
    let node = TestNode::new(LocalCluster::standalone("node-a:5710"), &config);
    let manager = node.start_index(issue_index_config("Issue", 1), &config, store_with(issues));
    node.settle().await;

    let stats = manager.stats().unwrap();
    assert_eq!(stats.entity_documents, 5);
    assert_eq!(stats.progress_mark, 5);
    assert_eq!(manager.count("flaky").await.unwrap(), 5);
}

#[tokio::test]
async fn test_scan_resumes_after_restart() {
    let site = TempDir::new().unwrap();
    let mut config = test_config(site.path());
    config.indexing.batch_size = 2;

    let store = store_with(
        (1..=3)
            .map(|id| issue(id, 1, "Broken build", "Pipeline fails"))
            .collect(),
    );

    {
        let node = TestNode::new(LocalCluster::standalone("node-a:5710"), &config);
        let manager = node.start_index(issue_index_config("Issue", 1), &config, store.clone());
        node.settle().await;
        assert_eq!(manager.stats().unwrap().progress_mark, 3);
        manager.on_stopping();
        node.work.shutdown().await;
    }

    // Created while the node was down; only these are new to the scan
    for id in 4..=6 {
        store.save(issue(id, 1, "Broken deploy", "Rollout fails"));
    }
    // Stale text for an already scanned entity is not picked up by the scan
    store.save(issue(2, 1, "Renamed while down", "Nothing else"));

    let node = TestNode::new(LocalCluster::standalone("node-a:5710"), &config);
    let manager = node.start_index(issue_index_config("Issue", 1), &config, store.clone());
    node.settle().await;

    let stats = manager.stats().unwrap();
    assert_eq!(stats.schema_version, Some(1));
    assert_eq!(stats.progress_mark, 6);
    assert_eq!(stats.entity_documents, 6);
    assert_eq!(manager.count("deploy").await.unwrap(), 3);
    assert_eq!(manager.count("renamed").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unowned_projects_still_advance_progress() {
    let site = TempDir::new().unwrap();
    let config = test_config(site.path());

    let cluster = LocalCluster::new();
    let node = TestNode::new(cluster.join("node-a:5710"), &config);
    cluster.assign_project(1, node.node.address());

    let store = store_with(vec![
        issue(1, 1, "Owned here", "Local project"),
        issue(2, 9, "Owned elsewhere", "Remote project"),
    ]);
    let manager = node.start_index(issue_index_config("Issue", 1), &config, store);
    node.settle().await;

    let stats = manager.stats().unwrap();
    assert_eq!(stats.entity_documents, 1);
    assert_eq!(stats.progress_mark, 2);
}

//! Shared fixtures for the integration tests
//!
//! An `Issue` entity type, an in-memory store of issues and helpers that
//! bring up text index nodes on an in-process cluster.

#![allow(dead_code)]

use project_text_index::cluster::{ClusterTaskHandler, LocalClusterNode};
use project_text_index::config::{Config, MIN_WRITER_HEAP_SIZE};
use project_text_index::models::{EntityId, ProjectEntity, ProjectId};
use project_text_index::scheduler::BatchWorkManager;
use project_text_index::search::{EntityIndexConfig, ProjectTextManager, TextIndexRegistry};
use project_text_index::state::InMemoryEntityStore;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub id: EntityId,
    pub project: ProjectId,
    pub title: String,
    pub body: String,
    pub state: String,
    pub votes: u64,
}

impl ProjectEntity for Issue {
    fn id(&self) -> EntityId {
        self.id
    }

    fn project_id(&self) -> ProjectId {
        self.project
    }
}

pub fn issue(id: EntityId, project: ProjectId, title: &str, body: &str) -> Issue {
    Issue {
        id,
        project,
        title: title.to_string(),
        body: body.to_string(),
        state: "open".to_string(),
        votes: 0,
    }
}

/// Four issues spread over projects 1 and 2
pub fn sample_issues() -> Vec<Issue> {
    vec![
        Issue {
            votes: 3,
            ..issue(1, 1, "Server crashes on startup", "The server process dies")
        },
        Issue {
            votes: 8,
            ..issue(2, 1, "Login page is slow", "Slow response from the auth service")
        },
        Issue {
            state: "closed".to_string(),
            votes: 12,
            ..issue(3, 2, "Crash when uploading files", "Upload of large files crashes the worker")
        },
        Issue {
            votes: 5,
            ..issue(4, 2, "Add dark mode", "Users want a dark theme")
        },
    ]
}

pub fn store_with(issues: Vec<Issue>) -> Arc<InMemoryEntityStore<Issue>> {
    let store = Arc::new(InMemoryEntityStore::new());
    for issue in issues {
        store.save(issue);
    }
    store
}

/// Index configuration for issues under the given entity type name
pub fn issue_index_config(type_name: &str, version: u64) -> EntityIndexConfig<Issue> {
    EntityIndexConfig::builder(type_name, version)
        .text_field("title")
        .text_field("body")
        .keyword_field("state")
        .u64_field("votes")
        .default_query_fields(["title", "body"])
        .extractor(|issue: &Issue, doc| {
            doc.add_text("title", &issue.title)
                .add_text("body", &issue.body)
                .add_text("state", &issue.state)
                .add_u64("votes", issue.votes);
        })
        .build()
        .unwrap()
}

/// Configuration rooted at `site_dir` with a small writer heap and short fan-out timeout
pub fn test_config(site_dir: &Path) -> Config {
    let mut config = Config::with_site_dir(site_dir);
    config.indexing.writer_heap_size = MIN_WRITER_HEAP_SIZE;
    config.indexing.worker_pool_size = 2;
    config.cluster.fanout_timeout_ms = 2_000;
    config
}

/// One node with its work pool and registry of text indexes
pub struct TestNode {
    pub node: Arc<LocalClusterNode>,
    pub registry: Arc<TextIndexRegistry>,
    pub work: Arc<BatchWorkManager>,
}

impl TestNode {
    pub fn new(node: Arc<LocalClusterNode>, config: &Config) -> Self {
        let registry = TextIndexRegistry::new();
        let handler: Arc<dyn ClusterTaskHandler> = registry.clone();
        node.attach(&handler);

        Self {
            node,
            registry,
            work: BatchWorkManager::from_config(&config.indexing),
        }
    }

    /// Create, register and start a text index for issues on this node
    pub fn start_index(
        &self,
        index_config: EntityIndexConfig<Issue>,
        config: &Config,
        store: Arc<InMemoryEntityStore<Issue>>,
    ) -> Arc<ProjectTextManager<Issue>> {
        let manager = ProjectTextManager::new(
            index_config,
            config,
            store,
            self.node.clone(),
            Arc::clone(&self.work),
        )
        .unwrap();
        self.registry.register(manager.clone());
        manager.on_started().unwrap();
        manager
    }

    pub async fn settle(&self) {
        self.work.wait_until_idle().await;
    }
}

pub fn ids(issues: &[Issue]) -> Vec<EntityId> {
    issues.iter().map(|issue| issue.id).collect()
}

//! Node-local dispatch of cluster tasks to entity indexes

use crate::cluster::{ClusterError, ClusterResponse, ClusterResult, ClusterTask, ClusterTaskHandler};
use crate::models::{EntityId, ProjectId};
use crate::search::error::SearchResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Operations a node runs against its own copy of an entity index
pub trait LocalTextIndex: Send + Sync {
    fn index_name(&self) -> &str;

    /// Hits in the local snapshot; 0 when the index is not open
    fn local_count(&self, query: &str) -> SearchResult<u64>;

    /// Top `limit` local hits by score; empty when the index is not open
    fn local_search(&self, query: &str, limit: usize) -> SearchResult<HashMap<EntityId, f32>>;

    fn local_delete_project(&self, project_id: ProjectId) -> SearchResult<()>;
}

/// Every entity index of one node, addressable by index name
#[derive(Default)]
pub struct TextIndexRegistry {
    indexes: DashMap<String, Arc<dyn LocalTextIndex>>,
}

impl TextIndexRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, index: Arc<dyn LocalTextIndex>) {
        debug!(index = %index.index_name(), "Registered text index");
        self.indexes.insert(index.index_name().to_string(), index);
    }

    pub fn unregister(&self, index_name: &str) {
        self.indexes.remove(index_name);
    }

    pub fn get(&self, index_name: &str) -> Option<Arc<dyn LocalTextIndex>> {
        self.indexes
            .get(index_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ClusterTaskHandler for TextIndexRegistry {
    async fn handle(&self, task: ClusterTask) -> ClusterResult<ClusterResponse> {
        let index = self
            .get(task.index())
            .ok_or_else(|| ClusterError::UnknownIndex(task.index().to_string()))?;

        let response = match task {
            ClusterTask::Count { query, .. } => ClusterResponse::Count(index.local_count(&query)?),
            ClusterTask::Search { query, limit, .. } => {
                ClusterResponse::Scores(index.local_search(&query, limit)?)
            }
            ClusterTask::DeleteProject { project_id, .. } => {
                index.local_delete_project(project_id)?;
                ClusterResponse::Done
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Fake {
        name: &'static str,
        deleted: Mutex<Vec<ProjectId>>,
    }

    impl LocalTextIndex for Fake {
        fn index_name(&self) -> &str {
            self.name
        }

        fn local_count(&self, _query: &str) -> SearchResult<u64> {
            Ok(4)
        }

        fn local_search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> SearchResult<HashMap<EntityId, f32>> {
            Ok(HashMap::from([(1, 0.5)]))
        }

        fn local_delete_project(&self, project_id: ProjectId) -> SearchResult<()> {
            self.deleted.lock().push(project_id);
            Ok(())
        }
    }

    fn fake(name: &'static str) -> Arc<Fake> {
        Arc::new(Fake {
            name,
            deleted: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_dispatch_by_index_name() {
        let registry = TextIndexRegistry::new();
        let issues = fake("issue");
        let commits = fake("code_comment");
        registry.register(issues.clone());
        registry.register(commits.clone());

        let response = registry
            .handle(ClusterTask::DeleteProject {
                index: "issue".to_string(),
                project_id: 3,
            })
            .await
            .unwrap();

        assert_eq!(response, ClusterResponse::Done);
        assert_eq!(*issues.deleted.lock(), vec![3]);
        assert!(commits.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let registry = TextIndexRegistry::new();
        let result = registry
            .handle(ClusterTask::Count {
                index: "wiki".to_string(),
                query: "*:*".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ClusterError::UnknownIndex(_))));
    }
}

//! Scatter-gather of counts and scored hits across the cluster

use crate::cluster::{
    run_on_all_servers, BroadcastResult, ClusterManager, ClusterResponse, ClusterTask,
};
use crate::models::{EntityId, ProjectEntity, ProjectId};
use crate::search::error::SearchResult;
use crate::search::metrics::SEARCH_METRICS;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Broadcasts queries for one index and merges node answers
pub struct QueryCoordinator {
    index_name: String,
    cluster: Arc<dyn ClusterManager>,
    timeout: Duration,
}

impl QueryCoordinator {
    pub fn new(
        index_name: impl Into<String>,
        cluster: Arc<dyn ClusterManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            cluster,
            timeout,
        }
    }

    /// Total hits over every node; failed nodes contribute nothing
    pub async fn count(&self, query: &str) -> SearchResult<u64> {
        let started = Instant::now();
        let task = ClusterTask::Count {
            index: self.index_name.clone(),
            query: query.to_string(),
        };
        let result = self.broadcast(&task).await;
        let total = sum_counts(&self.index_name, &result);

        SEARCH_METRICS.observe_query(&self.index_name, "count", started.elapsed().as_secs_f64());
        debug!(index = %self.index_name, total, nodes = result.node_count(), "Counted hits");
        Ok(total)
    }

    /// Entity IDs of the `[offset, offset + limit)` window of the merged ranking
    pub async fn search(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> SearchResult<Vec<EntityId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let task = ClusterTask::Search {
            index: self.index_name.clone(),
            query: query.to_string(),
            limit: offset.saturating_add(limit),
        };
        let result = self.broadcast(&task).await;
        let scores = merge_scores(&self.index_name, result);
        let ranked = rank_window(&scores, offset, limit);

        SEARCH_METRICS.observe_query(&self.index_name, "search", started.elapsed().as_secs_f64());
        debug!(
            index = %self.index_name,
            hits = scores.len(),
            returned = ranked.len(),
            "Merged hits"
        );
        Ok(ranked)
    }

    /// Remove a project from this index on every node
    pub async fn delete_project(&self, project_id: ProjectId) -> BroadcastResult {
        let task = ClusterTask::DeleteProject {
            index: self.index_name.clone(),
            project_id,
        };
        self.broadcast(&task).await
    }

    async fn broadcast(&self, task: &ClusterTask) -> BroadcastResult {
        let result = run_on_all_servers(self.cluster.as_ref(), task, self.timeout).await;
        SEARCH_METRICS.record_fanout_failures(
            &self.index_name,
            task.operation(),
            result.failures.len(),
        );
        result
    }
}

/// Sum of `Count` responses
pub fn sum_counts(index_name: &str, result: &BroadcastResult) -> u64 {
    result
        .responses
        .iter()
        .map(|(node, response)| match response {
            ClusterResponse::Count(count) => *count,
            other => {
                warn!(
                    index = %index_name,
                    node = %node,
                    response = ?other,
                    "Unexpected count response"
                );
                0
            }
        })
        .sum()
}

/// Union of `Scores` responses; an entity reported twice keeps its best score
pub fn merge_scores(index_name: &str, result: BroadcastResult) -> HashMap<EntityId, f32> {
    let mut merged: HashMap<EntityId, f32> = HashMap::new();
    for (node, response) in result.responses {
        match response {
            ClusterResponse::Scores(scores) => {
                for (entity_id, score) in scores {
                    merged
                        .entry(entity_id)
                        .and_modify(|best| *best = best.max(score))
                        .or_insert(score);
                }
            }
            other => {
                warn!(
                    index = %index_name,
                    node = %node,
                    response = ?other,
                    "Unexpected search response"
                );
            }
        }
    }
    merged
}

/// Rank by score descending, ties by ascending ID, then slice the window
pub fn rank_window(scores: &HashMap<EntityId, f32>, offset: usize, limit: usize) -> Vec<EntityId> {
    let mut ranked: Vec<(EntityId, f32)> = scores.iter().map(|(id, score)| (*id, *score)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(id, _)| id)
        .collect()
}

/// Arrange loaded entities in ranking order; IDs that failed to load are skipped
pub fn order_by_rank<E: ProjectEntity>(ranked: &[EntityId], entities: Vec<E>) -> Vec<E> {
    let mut by_id: HashMap<EntityId, E> = entities.into_iter().map(|e| (e.id(), e)).collect();
    ranked.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterError, NodeAddress};

    fn scores(pairs: &[(EntityId, f32)]) -> ClusterResponse {
        ClusterResponse::Scores(pairs.iter().copied().collect())
    }

    #[test]
    fn test_merge_and_window() {
        let mut result = BroadcastResult::default();
        result.responses.insert(NodeAddress::new("a"), scores(&[(1, 0.9), (2, 0.5)]));
        result.responses.insert(NodeAddress::new("b"), scores(&[(3, 0.8)]));

        let merged = merge_scores("issue", result);
        assert_eq!(rank_window(&merged, 0, 2), vec![1, 3]);
        assert_eq!(rank_window(&merged, 1, 2), vec![3, 2]);
        assert!(rank_window(&merged, 5, 2).is_empty());
    }

    #[test]
    fn test_ties_break_by_id() {
        let merged: HashMap<EntityId, f32> = [(9, 1.0), (4, 1.0), (7, 2.0)].into_iter().collect();
        assert_eq!(rank_window(&merged, 0, 10), vec![7, 4, 9]);
    }

    #[test]
    fn test_sum_counts_ignores_failures() {
        let mut result = BroadcastResult::default();
        result.responses.insert(NodeAddress::new("a"), ClusterResponse::Count(5));
        result.responses.insert(NodeAddress::new("b"), ClusterResponse::Count(0));
        result.responses.insert(NodeAddress::new("c"), ClusterResponse::Count(3));
        result.failures.insert(
            NodeAddress::new("d"),
            ClusterError::Unreachable("d".to_string()),
        );
        assert_eq!(sum_counts("issue", &result), 8);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Item(EntityId);

    impl ProjectEntity for Item {
        fn id(&self) -> EntityId {
            self.0
        }

        fn project_id(&self) -> ProjectId {
            1
        }
    }

    #[test]
    fn test_order_by_rank() {
        let loaded = vec![Item(2), Item(3), Item(1)];
        assert_eq!(order_by_rank(&[3, 1, 4, 2], loaded), vec![Item(3), Item(1), Item(2)]);
    }
}

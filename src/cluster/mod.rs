//! Cluster coordination seam
//!
//! The text index never talks to the network directly. It consults a
//! [`ClusterManager`] for membership, project ownership and task delivery,
//! and answers tasks addressed to the local node through a
//! [`ClusterTaskHandler`].
//!
//! - **`broadcast`**: parallel scatter-gather of one task to every live node.
//! - **`local`**: in-process cluster used by single-node deployments and tests.

pub mod broadcast;
pub mod local;

pub use broadcast::{run_on_all_servers, BroadcastResult};
pub use local::{LocalCluster, LocalClusterNode};

use crate::models::{EntityId, ProjectId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Network identity of a cluster node (e.g. `10.0.0.4:5710`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Work shipped to every node of the cluster.
///
/// Each task names the entity-type index it targets so a node only touches
/// that index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClusterTask {
    /// Count local hits of a query
    Count { index: String, query: String },

    /// Top `limit` local hits of a query, as entity ID to score
    Search {
        index: String,
        query: String,
        limit: usize,
    },

    /// Remove every document of a project from the local index
    DeleteProject { index: String, project_id: ProjectId },
}

impl ClusterTask {
    /// Name of the targeted index
    pub fn index(&self) -> &str {
        match self {
            ClusterTask::Count { index, .. }
            | ClusterTask::Search { index, .. }
            | ClusterTask::DeleteProject { index, .. } => index,
        }
    }

    /// Short operation label for logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            ClusterTask::Count { .. } => "count",
            ClusterTask::Search { .. } => "search",
            ClusterTask::DeleteProject { .. } => "delete_project",
        }
    }
}

/// Result of a [`ClusterTask`] on one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClusterResponse {
    Count(u64),
    Scores(HashMap<EntityId, f32>),
    Done,
}

/// Errors raised while delivering or executing a cluster task
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    /// The node could not be contacted
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// The node did not answer in time
    #[error("Node timed out: {0}")]
    Timeout(String),

    /// The node has no index with this name
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// The node failed while executing the task
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Task or response could not be encoded for transport
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Cluster membership, ownership and task delivery as seen from one node
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Address of the node this manager runs on
    fn local_server(&self) -> NodeAddress;

    /// Every node currently considered a cluster member
    async fn live_servers(&self) -> Vec<NodeAddress>;

    /// Node currently responsible for indexing the given project
    async fn active_server(&self, project_id: ProjectId) -> Option<NodeAddress>;

    /// Run a task on a node and wait for its response
    async fn submit_to_server(
        &self,
        server: &NodeAddress,
        task: ClusterTask,
    ) -> ClusterResult<ClusterResponse>;
}

/// Executes tasks addressed to the local node
#[async_trait]
pub trait ClusterTaskHandler: Send + Sync {
    async fn handle(&self, task: ClusterTask) -> ClusterResult<ClusterResponse>;
}

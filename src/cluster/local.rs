//! In-process cluster
//!
//! Every node of a [`LocalCluster`] lives in the same process. Tasks are
//! encoded to JSON and decoded again on delivery so they travel exactly as
//! they would over a real transport.

use super::{
    ClusterError, ClusterManager, ClusterResponse, ClusterResult, ClusterTask, ClusterTaskHandler,
    NodeAddress,
};
use crate::models::ProjectId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

struct NodeSlot {
    handler: Option<Weak<dyn ClusterTaskHandler>>,
    reachable: bool,
    delay: Option<Duration>,
}

impl NodeSlot {
    fn new() -> Self {
        Self {
            handler: None,
            reachable: true,
            delay: None,
        }
    }
}

/// Shared membership and ownership table of an in-process cluster
pub struct LocalCluster {
    nodes: DashMap<NodeAddress, NodeSlot>,
    owners: DashMap<ProjectId, NodeAddress>,
    default_owner: RwLock<Option<NodeAddress>>,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            owners: DashMap::new(),
            default_owner: RwLock::new(None),
        })
    }

    /// Single-node cluster owning every project
    pub fn standalone(address: impl Into<String>) -> Arc<LocalClusterNode> {
        let cluster = Self::new();
        let node = cluster.join(address);
        cluster.set_default_owner(Some(node.address.clone()));
        node
    }

    /// Register a node and return its view of the cluster
    pub fn join(self: &Arc<Self>, address: impl Into<String>) -> Arc<LocalClusterNode> {
        let address = NodeAddress::new(address);
        self.nodes
            .entry(address.clone())
            .or_insert_with(NodeSlot::new);
        info!(node = %address, "Node joined local cluster");

        Arc::new(LocalClusterNode {
            address,
            cluster: Arc::clone(self),
        })
    }

    /// Remove a node from the membership
    pub fn leave(&self, address: &NodeAddress) {
        if self.nodes.remove(address).is_some() {
            info!(node = %address, "Node left local cluster");
        }
    }

    /// Route tasks for `address` to `handler`.
    ///
    /// The cluster holds the handler weakly; dropping the last strong
    /// reference makes the node unreachable.
    pub fn attach(&self, address: &NodeAddress, handler: &Arc<dyn ClusterTaskHandler>) {
        let mut slot = self
            .nodes
            .entry(address.clone())
            .or_insert_with(NodeSlot::new);
        slot.handler = Some(Arc::downgrade(handler));
    }

    pub fn set_reachable(&self, address: &NodeAddress, reachable: bool) {
        if let Some(mut slot) = self.nodes.get_mut(address) {
            slot.reachable = reachable;
        }
    }

    /// Delay every delivery to `address`
    pub fn set_delay(&self, address: &NodeAddress, delay: Option<Duration>) {
        if let Some(mut slot) = self.nodes.get_mut(address) {
            slot.delay = delay;
        }
    }

    /// Make `address` the active server of a project
    pub fn assign_project(&self, project_id: ProjectId, address: &NodeAddress) {
        self.owners.insert(project_id, address.clone());
    }

    pub fn unassign_project(&self, project_id: ProjectId) {
        self.owners.remove(&project_id);
    }

    /// Owner of every project without an explicit assignment
    pub fn set_default_owner(&self, address: Option<NodeAddress>) {
        *self.default_owner.write() = address;
    }

    /// Current members, sorted by address
    pub fn members(&self) -> Vec<NodeAddress> {
        let mut members: Vec<NodeAddress> =
            self.nodes.iter().map(|entry| entry.key().clone()).collect();
        members.sort();
        members
    }

    fn owner_of(&self, project_id: ProjectId) -> Option<NodeAddress> {
        self.owners
            .get(&project_id)
            .map(|owner| owner.value().clone())
            .or_else(|| self.default_owner.read().clone())
    }
}

/// One node's [`ClusterManager`] view of a [`LocalCluster`]
pub struct LocalClusterNode {
    address: NodeAddress,
    cluster: Arc<LocalCluster>,
}

impl LocalClusterNode {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn cluster(&self) -> &Arc<LocalCluster> {
        &self.cluster
    }

    /// Attach the task handler of this node
    pub fn attach(&self, handler: &Arc<dyn ClusterTaskHandler>) {
        self.cluster.attach(&self.address, handler);
    }
}

#[async_trait]
impl ClusterManager for LocalClusterNode {
    fn local_server(&self) -> NodeAddress {
        self.address.clone()
    }

    async fn live_servers(&self) -> Vec<NodeAddress> {
        self.cluster.members()
    }

    async fn active_server(&self, project_id: ProjectId) -> Option<NodeAddress> {
        self.cluster.owner_of(project_id)
    }

    async fn submit_to_server(
        &self,
        server: &NodeAddress,
        task: ClusterTask,
    ) -> ClusterResult<ClusterResponse> {
        let (handler, reachable, delay) = {
            let slot = self
                .cluster
                .nodes
                .get(server)
                .ok_or_else(|| ClusterError::Unreachable(server.to_string()))?;
            (slot.handler.clone(), slot.reachable, slot.delay)
        };

        if !reachable {
            return Err(ClusterError::Unreachable(server.to_string()));
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let handler = handler
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| ClusterError::Unreachable(format!("{} has no handler", server)))?;

        let wire = serde_json::to_vec(&task)
            .map_err(|e| ClusterError::Serialization(e.to_string()))?;
        let task: ClusterTask = serde_json::from_slice(&wire)
            .map_err(|e| ClusterError::Serialization(e.to_string()))?;
        debug!(
            from = %self.address,
            to = %server,
            operation = task.operation(),
            "Delivering cluster task"
        );

        let response = handler.handle(task).await?;
        let wire = serde_json::to_vec(&response)
            .map_err(|e| ClusterError::Serialization(e.to_string()))?;
        serde_json::from_slice(&wire).map_err(|e| ClusterError::Serialization(e.to_string()))
    }
}

//! Scatter-gather of one task to every live node

use super::{ClusterError, ClusterManager, ClusterResponse, ClusterTask, NodeAddress};
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Responses collected from a broadcast, keyed by node address
#[derive(Debug, Default)]
pub struct BroadcastResult {
    pub responses: HashMap<NodeAddress, ClusterResponse>,
    pub failures: HashMap<NodeAddress, ClusterError>,
}

impl BroadcastResult {
    pub fn node_count(&self) -> usize {
        self.responses.len() + self.failures.len()
    }
}

/// Run `task` on every live node in parallel.
///
/// Each node gets its own `timeout`; a node that fails, is unreachable or
/// times out lands in `failures` and never cancels the others.
pub async fn run_on_all_servers(
    cluster: &dyn ClusterManager,
    task: &ClusterTask,
    timeout: Duration,
) -> BroadcastResult {
    let servers = cluster.live_servers().await;
    debug!(
        operation = task.operation(),
        index = task.index(),
        nodes = servers.len(),
        "Broadcasting cluster task"
    );

    let futures = servers.into_iter().map(|server| {
        let task = task.clone();
        async move {
            let outcome =
                match tokio::time::timeout(timeout, cluster.submit_to_server(&server, task)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ClusterError::Timeout(format!(
                        "{} did not answer within {:?}",
                        server, timeout
                    ))),
                };
            (server, outcome)
        }
    });

    let mut result = BroadcastResult::default();
    for (server, outcome) in join_all(futures).await {
        match outcome {
            Ok(response) => {
                result.responses.insert(server, response);
            }
            Err(e) => {
                warn!(
                    node = %server,
                    operation = task.operation(),
                    index = task.index(),
                    error = %e,
                    "Cluster task failed on node"
                );
                result.failures.insert(server, e);
            }
        }
    }
    result
}

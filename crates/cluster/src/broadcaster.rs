//! Cluster execution seam.

use std::time::Duration;

use async_trait::async_trait;
use stratum_modules::ScopeId;

use crate::report::BroadcastReport;
use crate::task::{ClusterTask, NodeId};

/// Default wait for peers when the caller does not override it.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Runs tasks on every other member of the cluster.
#[async_trait]
pub trait ClusterBroadcaster: Send + Sync {
	/// Identity of the node this broadcaster sends from.
	fn local_node(&self) -> NodeId;

	/// Executes `task` on every node except the local one and waits for all of them.
	///
	/// Each node is bounded by `timeout`. Failures are reported per node and never
	/// abort the broadcast; the local node never appears in the report.
	async fn execute_on_others_and_wait(&self, task: ClusterTask, scope: ScopeId, timeout: Duration) -> BroadcastReport;
}

/// Receives tasks broadcast by other nodes.
#[async_trait]
pub trait ClusterTaskHandler: Send + Sync {
	async fn handle(&self, task: ClusterTask) -> Result<(), String>;
}

/// Broadcaster for a node without peers. Every broadcast succeeds with an empty report.
#[derive(Debug, Clone, Copy)]
pub struct SoloBroadcaster {
	node: NodeId,
}

impl SoloBroadcaster {
	pub fn new(node: NodeId) -> Self {
		Self { node }
	}
}

#[async_trait]
impl ClusterBroadcaster for SoloBroadcaster {
	fn local_node(&self) -> NodeId {
		self.node
	}

	async fn execute_on_others_and_wait(&self, _task: ClusterTask, _scope: ScopeId, _timeout: Duration) -> BroadcastReport {
		BroadcastReport::new(self.node)
	}
}

//! In-process cluster: every member lives in the same runtime.
//!
//! Members register a [`ClusterTaskHandler`]; the cluster holds them weakly so a node that is
//! dropped simply becomes unreachable. Broadcasts fan out on a [`JoinSet`], one task per peer,
//! each bounded by the caller's timeout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use stratum_modules::ScopeId;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::broadcaster::{ClusterBroadcaster, ClusterTaskHandler};
use crate::report::{BroadcastReport, NodeFailure};
use crate::task::{ClusterTask, NodeId};

/// Membership table shared by every node of an in-process cluster.
#[derive(Default)]
pub struct LocalCluster {
	members: RwLock<BTreeMap<NodeId, Weak<dyn ClusterTaskHandler>>>,
}

impl LocalCluster {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Adds or replaces `node`.
	pub fn join(&self, node: NodeId, handler: &Arc<dyn ClusterTaskHandler>) {
		self.members.write().insert(node, Arc::downgrade(handler));
		debug!(%node, "node joined local cluster");
	}

	/// Removes `node`; returns false if it was not a member.
	pub fn leave(&self, node: NodeId) -> bool {
		let removed = self.members.write().remove(&node).is_some();
		if removed {
			debug!(%node, "node left local cluster");
		}
		removed
	}

	pub fn members(&self) -> Vec<NodeId> {
		self.members.read().keys().copied().collect()
	}

	/// Broadcaster that sends from `node`.
	pub fn broadcaster(self: &Arc<Self>, node: NodeId) -> LocalBroadcaster {
		LocalBroadcaster {
			cluster: Arc::clone(self),
			node,
		}
	}

	fn peers_of(&self, node: NodeId) -> Vec<(NodeId, Weak<dyn ClusterTaskHandler>)> {
		self.members
			.read()
			.iter()
			.filter(|(id, _)| **id != node)
			.map(|(id, handler)| (*id, Weak::clone(handler)))
			.collect()
	}
}

/// [`ClusterBroadcaster`] backed by a [`LocalCluster`].
#[derive(Clone)]
pub struct LocalBroadcaster {
	cluster: Arc<LocalCluster>,
	node: NodeId,
}

impl LocalBroadcaster {
	pub fn cluster(&self) -> &Arc<LocalCluster> {
		&self.cluster
	}
}

#[async_trait]
impl ClusterBroadcaster for LocalBroadcaster {
	fn local_node(&self) -> NodeId {
		self.node
	}

	async fn execute_on_others_and_wait(&self, task: ClusterTask, scope: ScopeId, timeout: Duration) -> BroadcastReport {
		let mut report = BroadcastReport::new(self.node);
		let mut pending = JoinSet::new();
		let mut awaiting = BTreeSet::new();

		for (peer, handler) in self.cluster.peers_of(self.node) {
			let Some(handler) = handler.upgrade() else {
				report.record(peer, Err(NodeFailure::Unreachable("node is no longer running".into())));
				continue;
			};
			let task = task.clone();
			awaiting.insert(peer);
			pending.spawn(async move {
				let outcome = match tokio::time::timeout(timeout, handler.handle(task)).await {
					Ok(Ok(())) => Ok(()),
					Ok(Err(message)) => Err(NodeFailure::Remote(message)),
					Err(_) => Err(NodeFailure::Timeout { after: timeout }),
				};
				(peer, outcome)
			});
		}

		debug!(origin = %self.node, %scope, task = task.kind(), peers = awaiting.len(), "broadcasting cluster task");

		while let Some(joined) = pending.join_next().await {
			let (peer, outcome) = match joined {
				Ok(reply) => reply,
				Err(error) => {
					warn!(origin = %self.node, %scope, %error, "cluster task aborted on a peer");
					continue;
				}
			};
			awaiting.remove(&peer);
			if let Err(failure) = &outcome {
				warn!(origin = %self.node, %peer, %scope, task = task.kind(), %failure, "cluster task failed on peer");
			}
			report.record(peer, outcome);
		}

		for peer in awaiting {
			report.record(peer, Err(NodeFailure::Unreachable("handler ended without replying".into())));
		}
		report
	}
}

#[cfg(test)]
mod tests;

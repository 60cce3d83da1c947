//! Broadcaster double for tests of cluster-aware services.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use stratum_modules::ScopeId;

use crate::broadcaster::ClusterBroadcaster;
use crate::report::{BroadcastReport, NodeFailure};
use crate::task::{ClusterTask, NodeId};

/// One broadcast observed by a [`ScriptedBroadcaster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTask {
	pub task: ClusterTask,
	pub scope: ScopeId,
	pub timeout: Duration,
}

/// Records every broadcast and answers with scripted per-node outcomes.
///
/// Outcomes queued with [`Self::push_outcome`] are consumed one per broadcast; once the queue
/// is empty every peer acknowledges.
pub struct ScriptedBroadcaster {
	node: NodeId,
	peers: Vec<NodeId>,
	outcomes: Mutex<VecDeque<BTreeMap<NodeId, Result<(), NodeFailure>>>>,
	sent: Mutex<Vec<SentTask>>,
}

impl ScriptedBroadcaster {
	pub fn new(node: NodeId, peers: impl IntoIterator<Item = NodeId>) -> Self {
		Self {
			node,
			peers: peers.into_iter().collect(),
			outcomes: Mutex::new(VecDeque::new()),
			sent: Mutex::new(Vec::new()),
		}
	}

	/// Queues failures for the next broadcast. Peers not named acknowledge.
	pub fn push_outcome(&self, failures: impl IntoIterator<Item = (NodeId, NodeFailure)>) {
		let outcome = failures.into_iter().map(|(node, failure)| (node, Err(failure))).collect();
		self.outcomes.lock().push_back(outcome);
	}

	/// Makes the next broadcast fail on the first peer with a timeout.
	pub fn fail_next_with_timeout(&self) {
		if let Some(peer) = self.peers.first().copied() {
			self.push_outcome([(
				peer,
				NodeFailure::Timeout {
					after: Duration::from_secs(1),
				},
			)]);
		}
	}

	pub fn sent(&self) -> Vec<SentTask> {
		self.sent.lock().clone()
	}

	pub fn sent_tasks(&self) -> Vec<ClusterTask> {
		self.sent.lock().iter().map(|s| s.task.clone()).collect()
	}
}

#[async_trait]
impl ClusterBroadcaster for ScriptedBroadcaster {
	fn local_node(&self) -> NodeId {
		self.node
	}

	async fn execute_on_others_and_wait(&self, task: ClusterTask, scope: ScopeId, timeout: Duration) -> BroadcastReport {
		self.sent.lock().push(SentTask { task, scope, timeout });
		let mut scripted = self.outcomes.lock().pop_front().unwrap_or_default();
		let mut report = BroadcastReport::new(self.node);
		for peer in &self.peers {
			report.record(*peer, scripted.remove(peer).unwrap_or(Ok(())));
		}
		report
	}
}

//! Per-node broadcast outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::task::NodeId;

/// Why one peer did not acknowledge a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeFailure {
	/// No reply within the caller's deadline. The task may still complete remotely.
	#[error("timed out after {after:?}")]
	Timeout { after: Duration },
	/// The peer ran the task and reported an error.
	#[error("remote error: {0}")]
	Remote(String),
	/// The peer left the cluster or its handler died before replying.
	#[error("unreachable: {0}")]
	Unreachable(String),
}

impl NodeFailure {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}

/// Failing nodes of one broadcast, rendered as `node-2 (timed out after 5s), ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFailures(pub Vec<(NodeId, NodeFailure)>);

impl NodeFailures {
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn nodes(&self) -> Vec<NodeId> {
		self.0.iter().map(|(node, _)| *node).collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &(NodeId, NodeFailure)> {
		self.0.iter()
	}

	pub fn any_timeout(&self) -> bool {
		self.0.iter().any(|(_, failure)| failure.is_timeout())
	}
}

impl fmt::Display for NodeFailures {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (index, (node, failure)) in self.0.iter().enumerate() {
			if index > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{node} ({failure})")?;
		}
		Ok(())
	}
}

/// Outcome of running a task on every peer.
///
/// The broadcaster reports; callers decide whether any failure fails the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
	origin: NodeId,
	results: BTreeMap<NodeId, Result<(), NodeFailure>>,
}

impl BroadcastReport {
	pub fn new(origin: NodeId) -> Self {
		Self {
			origin,
			results: BTreeMap::new(),
		}
	}

	/// Records the outcome for `node`. Entries for the origin node are dropped.
	pub fn record(&mut self, node: NodeId, result: Result<(), NodeFailure>) {
		if node != self.origin {
			self.results.insert(node, result);
		}
	}

	pub fn origin(&self) -> NodeId {
		self.origin
	}

	pub fn results(&self) -> &BTreeMap<NodeId, Result<(), NodeFailure>> {
		&self.results
	}

	pub fn get(&self, node: NodeId) -> Option<&Result<(), NodeFailure>> {
		self.results.get(&node)
	}

	pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.results.keys().copied()
	}

	pub fn len(&self) -> usize {
		self.results.len()
	}

	pub fn is_empty(&self) -> bool {
		self.results.is_empty()
	}

	pub fn failures(&self) -> NodeFailures {
		NodeFailures(
			self.results
				.iter()
				.filter_map(|(node, result)| result.as_ref().err().map(|failure| (*node, failure.clone())))
				.collect(),
		)
	}

	pub fn is_success(&self) -> bool {
		self.results.values().all(Result::is_ok)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn origin_is_never_recorded() {
		let mut report = BroadcastReport::new(NodeId(1));
		report.record(NodeId(1), Ok(()));
		report.record(NodeId(2), Ok(()));
		assert_eq!(report.nodes().collect::<Vec<_>>(), vec![NodeId(2)]);
	}

	#[test]
	fn failures_name_their_nodes() {
		let mut report = BroadcastReport::new(NodeId(1));
		report.record(NodeId(2), Ok(()));
		report.record(
			NodeId(3),
			Err(NodeFailure::Timeout {
				after: Duration::from_secs(5),
			}),
		);
		report.record(NodeId(4), Err(NodeFailure::Remote("boom".into())));

		let failures = report.failures();
		assert!(!report.is_success());
		assert!(failures.any_timeout());
		assert_eq!(failures.nodes(), vec![NodeId(3), NodeId(4)]);
		assert_eq!(failures.to_string(), "node-3 (timed out after 5s), node-4 (remote error: boom)");
	}
}

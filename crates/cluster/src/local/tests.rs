use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use stratum_modules::TenantId;

use super::*;
use crate::task::ServicesState;

enum Behaviour {
	Ack,
	Fail(&'static str),
	Hang,
}

struct Peer {
	behaviour: Behaviour,
	seen: Mutex<Vec<ClusterTask>>,
}

impl Peer {
	fn new(behaviour: Behaviour) -> Arc<Self> {
		Arc::new(Self {
			behaviour,
			seen: Mutex::new(Vec::new()),
		})
	}
}

#[async_trait]
impl ClusterTaskHandler for Peer {
	async fn handle(&self, task: ClusterTask) -> Result<(), String> {
		self.seen.lock().push(task);
		match self.behaviour {
			Behaviour::Ack => Ok(()),
			Behaviour::Fail(message) => Err(message.to_string()),
			Behaviour::Hang => {
				tokio::time::sleep(Duration::from_secs(60)).await;
				Ok(())
			}
		}
	}
}

fn pause_task() -> ClusterTask {
	ClusterTask::SetServicesState {
		tenant: TenantId(7),
		state: ServicesState::Pause,
	}
}

fn join(cluster: &Arc<LocalCluster>, node: u64, peer: &Arc<Peer>) {
	let handler: Arc<dyn ClusterTaskHandler> = peer.clone();
	cluster.join(NodeId(node), &handler);
}

#[tokio::test]
async fn broadcast_skips_the_origin_node() {
	let cluster = LocalCluster::new();
	let origin = Peer::new(Behaviour::Ack);
	let other = Peer::new(Behaviour::Ack);
	join(&cluster, 1, &origin);
	join(&cluster, 2, &other);

	let report = cluster
		.broadcaster(NodeId(1))
		.execute_on_others_and_wait(pause_task(), ScopeId::tenant(TenantId(7)), Duration::from_secs(1))
		.await;

	assert!(report.is_success());
	assert_eq!(report.nodes().collect::<Vec<_>>(), vec![NodeId(2)]);
	assert!(origin.seen.lock().is_empty());
	assert_eq!(other.seen.lock().clone(), vec![pause_task()]);
}

#[tokio::test]
async fn per_node_failures_are_reported_not_raised() {
	let cluster = LocalCluster::new();
	let ok = Peer::new(Behaviour::Ack);
	let failing = Peer::new(Behaviour::Fail("disk full"));
	let hanging = Peer::new(Behaviour::Hang);
	join(&cluster, 2, &ok);
	join(&cluster, 3, &failing);
	join(&cluster, 4, &hanging);

	let timeout = Duration::from_millis(50);
	let report = cluster
		.broadcaster(NodeId(1))
		.execute_on_others_and_wait(pause_task(), ScopeId::GLOBAL, timeout)
		.await;

	assert_eq!(report.get(NodeId(2)), Some(&Ok(())));
	assert_eq!(report.get(NodeId(3)), Some(&Err(NodeFailure::Remote("disk full".into()))));
	assert_eq!(report.get(NodeId(4)), Some(&Err(NodeFailure::Timeout { after: timeout })));
	assert_eq!(report.failures().nodes(), vec![NodeId(3), NodeId(4)]);
}

#[tokio::test]
async fn dropped_members_are_unreachable() {
	let cluster = LocalCluster::new();
	let gone = Peer::new(Behaviour::Ack);
	join(&cluster, 2, &gone);
	drop(gone);

	let report = cluster
		.broadcaster(NodeId(1))
		.execute_on_others_and_wait(pause_task(), ScopeId::GLOBAL, Duration::from_secs(1))
		.await;

	assert!(matches!(report.get(NodeId(2)), Some(Err(NodeFailure::Unreachable(_)))));
}

#[tokio::test]
async fn left_members_receive_nothing() {
	let cluster = LocalCluster::new();
	let peer = Peer::new(Behaviour::Ack);
	join(&cluster, 2, &peer);
	assert!(cluster.leave(NodeId(2)));
	assert!(!cluster.leave(NodeId(2)));

	let report = cluster
		.broadcaster(NodeId(1))
		.execute_on_others_and_wait(pause_task(), ScopeId::GLOBAL, Duration::from_secs(1))
		.await;

	assert!(report.is_empty());
	assert!(peer.seen.lock().is_empty());
}

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use stratum_cluster::testing::ScriptedBroadcaster;
use stratum_cluster::{NodeFailure, NodeId};

use super::*;
use crate::collaborators::CollaboratorError;
use crate::error::ServiceAction;
use crate::memory::{MemoryPersistence, MemoryScheduler, MemorySessions, SchedulerCall, SessionCall};
use crate::testing::{RecordingRestartHandler, RecordingService, RestartPhase, ServiceLog, service_log};

const TENANT: TenantId = TenantId(42);

struct Fixture {
	persistence: Arc<MemoryPersistence>,
	scheduler: Arc<MemoryScheduler>,
	sessions: Arc<MemorySessions>,
	broadcaster: Arc<ScriptedBroadcaster>,
	log: ServiceLog,
	handler: Arc<RecordingRestartHandler>,
}

impl Fixture {
	fn new(status: TenantStatus) -> Self {
		Self::with_handler(status, RecordingRestartHandler::new())
	}

	fn with_handler(status: TenantStatus, handler: RecordingRestartHandler) -> Self {
		Self {
			persistence: Arc::new(MemoryPersistence::new().with_tenant(TenantRecord::new(TENANT, "acme", status))),
			scheduler: Arc::new(MemoryScheduler::new()),
			sessions: Arc::new(MemorySessions::new()),
			broadcaster: Arc::new(ScriptedBroadcaster::new(NodeId(1), [NodeId(2), NodeId(3)])),
			log: service_log(),
			handler: Arc::new(handler),
		}
	}

	fn builder(&self) -> TenantRuntimeBuilder {
		let collaborators = TenantCollaborators {
			persistence: self.persistence.clone(),
			scheduler: self.scheduler.clone(),
			sessions: self.sessions.clone(),
		};
		TenantRuntime::builder(TENANT, collaborators, self.broadcaster.clone())
			.service(Arc::new(RecordingService::new("connectors", &self.log)))
			.service(Arc::new(RecordingService::new("work", &self.log)))
			.restart_handler(self.handler.clone())
	}

	async fn runtime(&self) -> TenantRuntime {
		self.builder().build().await.unwrap()
	}

	fn service_calls(&self) -> Vec<(String, ServiceAction)> {
		self.log.lock().clone()
	}

	fn persisted(&self) -> Vec<Option<TenantStatus>> {
		self.persistence.updates().into_iter().map(|(_, u)| u.status).collect()
	}
}

fn calls(names: &[&str], action: ServiceAction) -> Vec<(String, ServiceAction)> {
	names.iter().map(|n| (n.to_string(), action)).collect()
}

#[rstest]
#[case::paused(TenantStatus::Paused)]
#[case::deactivated(TenantStatus::Deactivated)]
#[tokio::test]
async fn pause_outside_activated_has_no_side_effects(#[case] status: TenantStatus) {
	let fx = Fixture::new(status);
	let runtime = fx.runtime().await;

	let err = runtime.pause().await.unwrap_err();

	assert!(matches!(err, LifecycleError::InvalidTransition { action: Transition::Pause, state } if state == status));
	assert!(fx.persistence.updates().is_empty());
	assert!(fx.broadcaster.sent().is_empty());
	assert!(fx.scheduler.calls().is_empty());
	assert!(fx.sessions.calls().is_empty());
	assert!(fx.service_calls().is_empty());
}

#[rstest]
#[case::activated(Transition::Resume, TenantStatus::Activated)]
#[case::deactivated(Transition::Resume, TenantStatus::Deactivated)]
#[case::activate_active(Transition::Activate, TenantStatus::Activated)]
#[case::activate_paused(Transition::Activate, TenantStatus::Paused)]
#[case::deactivate_paused(Transition::Deactivate, TenantStatus::Paused)]
#[tokio::test]
async fn guards_reject_wrong_states(#[case] action: Transition, #[case] status: TenantStatus) {
	let fx = Fixture::new(status);
	let runtime = fx.runtime().await;

	let result = match action {
		Transition::Resume => runtime.resume().await,
		Transition::Activate => runtime.activate().await,
		Transition::Deactivate => runtime.deactivate().await,
		other => panic!("not a guarded transition: {other}"),
	};

	let err = result.unwrap_err();
	assert_eq!(err.to_string(), format!("can't {action} a tenant in state {status}"));
	assert!(fx.persistence.updates().is_empty());
	assert!(fx.broadcaster.sent().is_empty());
}

#[tokio::test]
async fn pause_runs_every_step_in_order() {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx.runtime().await;

	runtime.pause().await.unwrap();

	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Paused));
	assert_eq!(
		fx.broadcaster.sent_tasks(),
		vec![ClusterTask::SetServicesState {
			tenant: TENANT,
			state: ServicesState::Pause
		}]
	);
	assert_eq!(fx.broadcaster.sent()[0].scope, ScopeId::tenant(TENANT));
	assert_eq!(fx.scheduler.calls(), vec![SchedulerCall::Pause(TENANT)]);
	assert_eq!(fx.service_calls(), calls(&["connectors", "work"], ServiceAction::Pause));
	assert_eq!(fx.sessions.calls(), vec![SessionCall::DeleteTenantExceptTechnical(TENANT)]);
	assert_eq!(runtime.last_known_status(), TenantStatus::Paused);
}

#[tokio::test]
async fn failed_pause_keeps_persisted_status() {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx
		.builder()
		.service(Arc::new(RecordingService::new("broken", &fx.log).failing_on(ServiceAction::Pause)))
		.build()
		.await
		.unwrap();

	let err = runtime.pause().await.unwrap_err();

	assert!(matches!(err, LifecycleError::Service { ref service, action: ServiceAction::Pause, .. } if service == "broken"));
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Paused));
	assert!(fx.sessions.calls().is_empty());
}

#[tokio::test]
async fn resume_timeout_reverts_to_paused() {
	let fx = Fixture::new(TenantStatus::Paused);
	let runtime = fx.runtime().await;
	fx.broadcaster.fail_next_with_timeout();

	let err = runtime.resume().await.unwrap_err();

	assert!(err.is_timeout());
	assert!(matches!(&err, LifecycleError::Cluster { failures, .. } if failures.nodes() == vec![NodeId(2)]));
	assert_eq!(fx.persisted(), vec![Some(TenantStatus::Activated), Some(TenantStatus::Paused)]);
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Paused));
	assert!(fx.scheduler.calls().is_empty());
	assert!(fx.service_calls().is_empty());
}

#[tokio::test]
async fn resume_remote_error_is_not_a_timeout() {
	let fx = Fixture::new(TenantStatus::Paused);
	let runtime = fx.runtime().await;
	fx.broadcaster.push_outcome([(NodeId(3), NodeFailure::Remote("boom".into()))]);

	let err = runtime.resume().await.unwrap_err();

	assert!(!err.is_timeout());
	assert_eq!(err.to_string(), "resume of tenant 42 not acknowledged by node-3 (remote error: boom)");
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Paused));
}

#[tokio::test]
async fn resume_restart_preparation_failure_reverts_to_paused() {
	let fx = Fixture::with_handler(TenantStatus::Paused, RecordingRestartHandler::failing_before_start());
	let runtime = fx.runtime().await;

	let err = runtime.resume().await.unwrap_err();

	assert!(matches!(err, LifecycleError::RestartHandler { .. }));
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Paused));
	assert!(fx.scheduler.calls().is_empty());
}

#[tokio::test]
async fn resume_runs_every_step() {
	let fx = Fixture::new(TenantStatus::Paused);
	let runtime = fx.runtime().await;

	runtime.resume().await.unwrap();

	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Activated));
	assert_eq!(fx.service_calls(), calls(&["connectors", "work"], ServiceAction::Resume));
	assert_eq!(fx.scheduler.calls(), vec![SchedulerCall::Resume(TENANT)]);
	assert_eq!(fx.handler.calls(), vec![RestartPhase::BeforeServicesStart, RestartPhase::AfterServicesStart]);
}

#[tokio::test]
async fn restart_runs_once_until_paused() {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx.runtime().await;

	runtime.start().await.unwrap();
	runtime.start().await.unwrap();
	assert_eq!(fx.handler.calls().len(), 2);
	assert!(!runtime.restart_gate().should_restart_elements());

	runtime.pause().await.unwrap();
	assert!(runtime.restart_gate().should_restart_elements());

	runtime.resume().await.unwrap();
	assert_eq!(
		fx.handler.calls(),
		vec![
			RestartPhase::BeforeServicesStart,
			RestartPhase::AfterServicesStart,
			RestartPhase::BeforeServicesStart,
			RestartPhase::AfterServicesStart,
		]
	);
	assert!(!runtime.restart_gate().should_restart_elements());
}

#[tokio::test]
async fn deactivate_then_activate() {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx.runtime().await;

	runtime.deactivate().await.unwrap();
	assert_eq!(fx.sessions.calls(), vec![SessionCall::DeleteAll]);
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Deactivated));
	assert_eq!(fx.service_calls(), calls(&["connectors", "work"], ServiceAction::Stop));
	assert!(runtime.restart_gate().should_restart_elements());

	fx.log.lock().clear();
	runtime.activate().await.unwrap();
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Activated));
	assert_eq!(fx.service_calls(), calls(&["connectors", "work"], ServiceAction::Start));
	assert_eq!(fx.scheduler.calls(), vec![SchedulerCall::Pause(TENANT), SchedulerCall::Resume(TENANT)]);
	assert!(fx.broadcaster.sent().is_empty());
}

#[rstest]
#[case::delete(true, vec![SessionCall::DeleteTenant(TENANT)])]
#[case::keep(false, vec![])]
#[tokio::test]
async fn stop_applies_session_policy(#[case] delete: bool, #[case] expected: Vec<SessionCall>) {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx.builder().delete_sessions_on_stop(delete).build().await.unwrap();
	runtime.restart_gate().notify_elements_are_restarted();

	runtime.stop().await.unwrap();

	assert_eq!(fx.sessions.calls(), expected);
	assert_eq!(fx.service_calls(), calls(&["connectors", "work"], ServiceAction::Stop));
	assert!(fx.persistence.updates().is_empty());
	assert!(runtime.restart_gate().should_restart_elements());
}

#[tokio::test]
async fn peer_services_state_touches_only_services() {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx.runtime().await;

	runtime.apply_services_state(ServicesState::Pause).await.unwrap();
	runtime.apply_services_state(ServicesState::Resume).await.unwrap();

	let mut expected = calls(&["connectors", "work"], ServiceAction::Pause);
	expected.extend(calls(&["connectors", "work"], ServiceAction::Resume));
	assert_eq!(fx.service_calls(), expected);
	assert!(fx.persistence.updates().is_empty());
	assert!(fx.scheduler.calls().is_empty());
	assert!(fx.broadcaster.sent().is_empty());
	assert!(fx.handler.calls().is_empty());
}

#[tokio::test]
async fn concurrent_pauses_are_serialized() {
	let fx = Fixture::new(TenantStatus::Activated);
	let runtime = fx.runtime().await;

	let (first, second) = tokio::join!(runtime.pause(), runtime.pause());

	assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
	assert_eq!(fx.broadcaster.sent().len(), 1);
	assert_eq!(fx.scheduler.calls(), vec![SchedulerCall::Pause(TENANT)]);
}

#[tokio::test]
async fn missing_tenant_fails_to_build() {
	let fx = Fixture::new(TenantStatus::Activated);
	let collaborators = TenantCollaborators {
		persistence: Arc::new(MemoryPersistence::new()),
		scheduler: fx.scheduler.clone(),
		sessions: fx.sessions.clone(),
	};

	let err = TenantRuntime::builder(TENANT, collaborators, fx.broadcaster.clone()).build().await.err().unwrap();

	assert!(matches!(err, LifecycleError::TenantNotFound(TENANT)));
}

#[rstest]
#[case::pause(Transition::Pause, TenantStatus::Activated)]
#[case::resume(Transition::Resume, TenantStatus::Paused)]
#[case::activate(Transition::Activate, TenantStatus::Deactivated)]
#[case::deactivate(Transition::Deactivate, TenantStatus::Activated)]
#[tokio::test]
async fn transition_held_elsewhere_is_rejected(#[case] action: Transition, #[case] status: TenantStatus) {
	let fx = Fixture::new(status);
	let runtime = fx.runtime().await;
	assert_eq!(fx.persistence.begin_transition(TENANT, NodeId(2)).await.unwrap(), None);

	let result = match action {
		Transition::Pause => runtime.pause().await,
		Transition::Resume => runtime.resume().await,
		Transition::Activate => runtime.activate().await,
		Transition::Deactivate => runtime.deactivate().await,
		other => panic!("not a claimed transition: {other}"),
	};

	let err = result.unwrap_err();
	assert!(matches!(err, LifecycleError::TransitionInProgress { holder: NodeId(2), .. }), "{err}");
	assert_eq!(fx.persistence.status_of(TENANT), Some(status));
	assert!(fx.persistence.updates().is_empty());
	assert!(fx.broadcaster.sent().is_empty());
	assert!(fx.scheduler.calls().is_empty());
	assert!(fx.sessions.calls().is_empty());
	assert!(fx.service_calls().is_empty());
	assert_eq!(fx.persistence.transition_holder(TENANT), Some(NodeId(2)));
}

#[tokio::test]
async fn transition_mark_is_cleared_on_success_and_failure() {
	let fx = Fixture::new(TenantStatus::Paused);
	let runtime = fx.runtime().await;

	fx.broadcaster.fail_next_with_timeout();
	runtime.resume().await.unwrap_err();
	assert_eq!(fx.persistence.transition_holder(TENANT), None);

	runtime.pause().await.unwrap_err();
	assert_eq!(fx.persistence.transition_holder(TENANT), None);

	runtime.resume().await.unwrap();
	assert_eq!(fx.persistence.transition_holder(TENANT), None);
	assert_eq!(fx.persistence.status_of(TENANT), Some(TenantStatus::Activated));
}

/// Collaborators and a service appending to one journal, to observe cross-collaborator order.
struct Journal {
	persistence: MemoryPersistence,
	entries: Mutex<Vec<String>>,
}

impl Journal {
	fn new(status: TenantStatus) -> Arc<Self> {
		Arc::new(Self {
			persistence: MemoryPersistence::new().with_tenant(TenantRecord::new(TENANT, "acme", status)),
			entries: Mutex::new(Vec::new()),
		})
	}

	fn note(&self, entry: impl Into<String>) {
		self.entries.lock().push(entry.into());
	}

	fn entries(&self) -> Vec<String> {
		self.entries.lock().clone()
	}
}

#[async_trait]
impl PersistenceCollaborator for Journal {
	async fn get_tenant(&self, id: TenantId) -> std::result::Result<TenantRecord, CollaboratorError> {
		self.persistence.get_tenant(id).await
	}

	async fn update_tenant(&self, id: TenantId, update: TenantUpdate) -> std::result::Result<(), CollaboratorError> {
		if let Some(status) = update.status {
			self.note(format!("persist {status}"));
		}
		self.persistence.update_tenant(id, update).await
	}

	async fn begin_transition(&self, id: TenantId, node: NodeId) -> std::result::Result<Option<NodeId>, CollaboratorError> {
		self.persistence.begin_transition(id, node).await
	}

	async fn end_transition(&self, id: TenantId, node: NodeId) -> std::result::Result<(), CollaboratorError> {
		self.persistence.end_transition(id, node).await
	}
}

#[async_trait]
impl SchedulerCollaborator for Journal {
	async fn pause_jobs(&self, _: TenantId) -> std::result::Result<(), CollaboratorError> {
		self.note("pause jobs");
		Ok(())
	}

	async fn resume_jobs(&self, _: TenantId) -> std::result::Result<(), CollaboratorError> {
		self.note("resume jobs");
		Ok(())
	}
}

#[async_trait]
impl SessionCollaborator for Journal {
	async fn delete_sessions(&self) -> std::result::Result<(), CollaboratorError> {
		self.note("delete all sessions");
		Ok(())
	}

	async fn delete_sessions_of_tenant(&self, _: TenantId) -> std::result::Result<(), CollaboratorError> {
		self.note("delete tenant sessions");
		Ok(())
	}

	async fn delete_sessions_of_tenant_except_technical_user(&self, _: TenantId) -> std::result::Result<(), CollaboratorError> {
		self.note("delete tenant sessions except technical user");
		Ok(())
	}
}

#[async_trait]
impl LifecycleService for Journal {
	fn name(&self) -> &str {
		"journal"
	}

	async fn start(&self) -> std::result::Result<(), String> {
		self.note("start services");
		Ok(())
	}

	async fn stop(&self) -> std::result::Result<(), String> {
		self.note("stop services");
		Ok(())
	}

	async fn pause(&self) -> std::result::Result<(), String> {
		self.note("pause services");
		Ok(())
	}

	async fn resume(&self) -> std::result::Result<(), String> {
		self.note("resume services");
		Ok(())
	}
}

async fn journaled_runtime(journal: &Arc<Journal>) -> TenantRuntime {
	let collaborators = TenantCollaborators {
		persistence: journal.clone(),
		scheduler: journal.clone(),
		sessions: journal.clone(),
	};
	TenantRuntime::builder(TENANT, collaborators, Arc::new(ScriptedBroadcaster::new(NodeId(1), [NodeId(2)])))
		.service(journal.clone())
		.build()
		.await
		.unwrap()
}

#[tokio::test]
async fn deactivate_deletes_sessions_before_persisting_then_pauses_jobs_and_stops_services() {
	let journal = Journal::new(TenantStatus::Activated);
	let runtime = journaled_runtime(&journal).await;

	runtime.deactivate().await.unwrap();

	assert_eq!(journal.entries(), vec!["delete all sessions", "persist DEACTIVATED", "pause jobs", "stop services"]);
}

#[tokio::test]
async fn pause_persists_before_pausing_jobs_services_and_sessions() {
	let journal = Journal::new(TenantStatus::Activated);
	let runtime = journaled_runtime(&journal).await;

	runtime.pause().await.unwrap();

	assert_eq!(
		journal.entries(),
		vec!["persist PAUSED", "pause jobs", "pause services", "delete tenant sessions except technical user"]
	);
}

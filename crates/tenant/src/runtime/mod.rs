//! Tenant runtime: the ACTIVATED / PAUSED / DEACTIVATED state machine of one tenant.
//!
//! # Purpose
//!
//! - Drive a tenant's scheduler jobs, sessions and [`LifecycleService`]s through
//!   pause/resume/activate/deactivate and node start/stop.
//! - Keep peers in step by broadcasting the services state on pause and resume.
//! - Exclude persistence, scheduling and session storage; those are collaborators.
//!
//! # Mental model
//!
//! - The persisted [`TenantRecord`] is the source of truth. Every transition re-reads it and
//!   checks its guard before any side effect.
//! - Only resume compensates: a failed broadcast or restart preparation writes PAUSED back.
//!   A failed pause stays visibly partial.
//!
//! # Invariants
//!
//! 1. A rejected guard MUST NOT persist, broadcast or touch any collaborator.
//!    - Enforced in: `TenantRuntime::read_guarded`
//!    - Tested by: `runtime::tests::pause_outside_activated_has_no_side_effects`
//!    - Failure symptom: two nodes both "successfully" pause an already paused tenant.
//!
//! 2. A resume whose broadcast fails MUST leave the tenant persisted as PAUSED.
//!    - Enforced in: `TenantRuntime::resume`
//!    - Tested by: `runtime::tests::resume_timeout_reverts_to_paused`
//!    - Failure symptom: tenant marked ACTIVATED while peers still run paused services.
//!
//! 3. At most one node MUST move a tenant at a time.
//!    - Enforced in: `TenantRuntime::claim`, `PersistenceCollaborator::begin_transition`
//!    - Tested by: `runtime::tests::transition_held_elsewhere_is_rejected`
//!    - Failure symptom: a pause and a resume on two nodes wait on each other until the
//!      broadcast times out, leaving PAUSED persisted with nothing paused.
//!
//! 4. In-flight work MUST be recovered once per activation episode.
//!    - Enforced in: `TenantElementsRestarter` behind the [`RestartGate`]
//!    - Tested by: `runtime::tests::restart_runs_once_until_paused`
//!    - Failure symptom: work items resubmitted on every resume.
//!
//! # Concurrency & ordering
//!
//! - Transitions of one runtime are serialized by an async mutex held across every await
//!   of the transition.
//! - Pause, resume, activate and deactivate also hold the tenant's transition mark in
//!   persistence. A transition started on another node while the mark is held fails with
//!   [`LifecycleError::TransitionInProgress`] before its guard, so a pause on one node and a
//!   resume on another never interleave.
//! - Peers apply broadcast services states under their own mutex; a node holding it never
//!   waits on a broadcast unless it also holds the transition mark.
//! - Services run in registration order for every action.

use std::sync::Arc;
use std::time::Duration;

use stratum_cluster::{ClusterBroadcaster, ClusterTask, DEFAULT_BROADCAST_TIMEOUT, NodeId, ServicesState};
use stratum_modules::{ScopeId, TenantId};
use tracing::{debug, info, warn};

use crate::collaborators::{PersistenceCollaborator, SchedulerCollaborator, SessionCollaborator};
use crate::error::{LifecycleError, Result, Transition};
use crate::record::{TenantRecord, TenantStatus, TenantUpdate};
use crate::restart::{PlatformContext, RestartGate, TenantContext, TenantElementsRestarter, TenantRestartHandler};
use crate::services::{LifecycleService, TenantServices};

/// Platform services a tenant runtime calls into.
#[derive(Clone)]
pub struct TenantCollaborators {
	pub persistence: Arc<dyn PersistenceCollaborator>,
	pub scheduler: Arc<dyn SchedulerCollaborator>,
	pub sessions: Arc<dyn SessionCollaborator>,
}

pub struct TenantRuntimeBuilder {
	tenant: TenantId,
	collaborators: TenantCollaborators,
	broadcaster: Arc<dyn ClusterBroadcaster>,
	services: TenantServices,
	restart_handlers: Vec<Arc<dyn TenantRestartHandler>>,
	broadcast_timeout: Duration,
	delete_sessions_on_stop: bool,
}

impl TenantRuntimeBuilder {
	/// Appends a service; services run in the order they are added.
	pub fn service(mut self, service: Arc<dyn LifecycleService>) -> Self {
		self.services.register(service);
		self
	}

	pub fn restart_handler(mut self, handler: Arc<dyn TenantRestartHandler>) -> Self {
		self.restart_handlers.push(handler);
		self
	}

	pub fn broadcast_timeout(mut self, timeout: Duration) -> Self {
		self.broadcast_timeout = timeout;
		self
	}

	pub fn delete_sessions_on_stop(mut self, delete: bool) -> Self {
		self.delete_sessions_on_stop = delete;
		self
	}

	/// Reads the tenant record and builds the runtime in the persisted state.
	///
	/// # Errors
	///
	/// Returns [`LifecycleError::TenantNotFound`] when no record exists.
	pub async fn build(self) -> Result<TenantRuntime> {
		let record = self.collaborators.persistence.get_tenant(self.tenant).await?;
		debug!(tenant = self.tenant.0, status = %record.status, services = self.services.len(), "built tenant runtime");
		Ok(TenantRuntime {
			tenant: self.tenant,
			node: self.broadcaster.local_node(),
			collaborators: self.collaborators,
			broadcaster: self.broadcaster,
			services: self.services,
			restarter: TenantElementsRestarter::new(Arc::new(RestartGate::new()), self.restart_handlers),
			broadcast_timeout: self.broadcast_timeout,
			delete_sessions_on_stop: self.delete_sessions_on_stop,
			last_known: parking_lot::Mutex::new(record.status),
			transitions: tokio::sync::Mutex::new(()),
		})
	}
}

/// Lifecycle controller of one tenant on one node.
pub struct TenantRuntime {
	tenant: TenantId,
	node: NodeId,
	collaborators: TenantCollaborators,
	broadcaster: Arc<dyn ClusterBroadcaster>,
	services: TenantServices,
	restarter: TenantElementsRestarter,
	broadcast_timeout: Duration,
	delete_sessions_on_stop: bool,
	last_known: parking_lot::Mutex<TenantStatus>,
	transitions: tokio::sync::Mutex<()>,
}

impl TenantRuntime {
	pub fn builder(tenant: TenantId, collaborators: TenantCollaborators, broadcaster: Arc<dyn ClusterBroadcaster>) -> TenantRuntimeBuilder {
		TenantRuntimeBuilder {
			tenant,
			collaborators,
			broadcaster,
			services: TenantServices::new(),
			restart_handlers: Vec::new(),
			broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
			delete_sessions_on_stop: true,
		}
	}

	pub fn tenant_id(&self) -> TenantId {
		self.tenant
	}

	pub fn node(&self) -> NodeId {
		self.node
	}

	/// Status observed by the last read or transition on this node.
	pub fn last_known_status(&self) -> TenantStatus {
		*self.last_known.lock()
	}

	/// Reads the persisted status.
	///
	/// # Errors
	///
	/// Returns [`LifecycleError::TenantNotFound`] when the record disappeared.
	pub async fn status(&self) -> Result<TenantStatus> {
		let record = self.collaborators.persistence.get_tenant(self.tenant).await?;
		self.observe(record.status);
		Ok(record.status)
	}

	pub fn restart_gate(&self) -> &Arc<RestartGate> {
		self.restarter.gate()
	}

	pub fn services(&self) -> &TenantServices {
		&self.services
	}

	/// ACTIVATED → PAUSED, cluster-wide.
	///
	/// # Errors
	///
	/// [`LifecycleError::InvalidTransition`] unless ACTIVATED, and
	/// [`LifecycleError::TransitionInProgress`] while another node moves the tenant; otherwise
	/// the first failing step. The persisted PAUSED status is kept on failure.
	pub async fn pause(&self) -> Result<()> {
		let _serial = self.transitions.lock().await;
		self.claim(Transition::Pause).await?;
		let outcome = self.pause_claimed().await;
		self.release(outcome).await
	}

	async fn pause_claimed(&self) -> Result<()> {
		self.read_guarded(Transition::Pause, TenantStatus::Activated).await?;
		info!(tenant = self.tenant.0, node = %self.node, "pausing tenant");

		self.persist(TenantStatus::Paused).await?;
		self.restarter.gate().notify_paused();
		self.broadcast(Transition::Pause, ServicesState::Pause).await?;
		self.collaborators.scheduler.pause_jobs(self.tenant).await?;
		self.services.pause().await?;
		self.collaborators.sessions.delete_sessions_of_tenant_except_technical_user(self.tenant).await?;

		info!(tenant = self.tenant.0, "tenant paused");
		Ok(())
	}

	/// PAUSED → ACTIVATED, cluster-wide.
	///
	/// # Errors
	///
	/// [`LifecycleError::InvalidTransition`] unless PAUSED, and
	/// [`LifecycleError::TransitionInProgress`] while another node moves the tenant. If the
	/// broadcast or the restart preparation fails, PAUSED is persisted again before the error
	/// is returned.
	pub async fn resume(&self) -> Result<()> {
		let _serial = self.transitions.lock().await;
		self.claim(Transition::Resume).await?;
		let outcome = self.resume_claimed().await;
		self.release(outcome).await
	}

	async fn resume_claimed(&self) -> Result<()> {
		let record = self.read_guarded(Transition::Resume, TenantStatus::Paused).await?;
		info!(tenant = self.tenant.0, node = %self.node, "resuming tenant");

		self.persist(TenantStatus::Activated).await?;
		if let Err(error) = self.broadcast(Transition::Resume, ServicesState::Resume).await {
			return Err(self.revert_to_paused(error).await);
		}
		let (platform, tenant) = self.contexts(&record);
		if let Err(error) = self.restarter.prepare_restart(&platform, &tenant).await {
			return Err(self.revert_to_paused(error).await);
		}
		self.services.resume().await?;
		self.collaborators.scheduler.resume_jobs(self.tenant).await?;
		self.restarter.restart(&platform, &tenant).await?;

		info!(tenant = self.tenant.0, "tenant resumed");
		Ok(())
	}

	/// DEACTIVATED → ACTIVATED on this node.
	///
	/// # Errors
	///
	/// [`LifecycleError::InvalidTransition`] unless DEACTIVATED; otherwise the first failing
	/// step, without compensation.
	pub async fn activate(&self) -> Result<()> {
		let _serial = self.transitions.lock().await;
		self.claim(Transition::Activate).await?;
		let outcome = self.activate_claimed().await;
		self.release(outcome).await
	}

	async fn activate_claimed(&self) -> Result<()> {
		let record = self.read_guarded(Transition::Activate, TenantStatus::Deactivated).await?;
		info!(tenant = self.tenant.0, node = %self.node, "activating tenant");

		self.persist(TenantStatus::Activated).await?;
		let (platform, tenant) = self.contexts(&record);
		self.restarter.prepare_restart(&platform, &tenant).await?;
		self.services.start().await?;
		self.collaborators.scheduler.resume_jobs(self.tenant).await?;
		self.restarter.restart(&platform, &tenant).await?;

		info!(tenant = self.tenant.0, "tenant activated");
		Ok(())
	}

	/// ACTIVATED → DEACTIVATED on this node.
	///
	/// # Errors
	///
	/// [`LifecycleError::InvalidTransition`] unless ACTIVATED; otherwise the first failing step.
	pub async fn deactivate(&self) -> Result<()> {
		let _serial = self.transitions.lock().await;
		self.claim(Transition::Deactivate).await?;
		let outcome = self.deactivate_claimed().await;
		self.release(outcome).await
	}

	async fn deactivate_claimed(&self) -> Result<()> {
		self.read_guarded(Transition::Deactivate, TenantStatus::Activated).await?;
		info!(tenant = self.tenant.0, node = %self.node, "deactivating tenant");

		self.collaborators.sessions.delete_sessions().await?;
		self.persist(TenantStatus::Deactivated).await?;
		self.collaborators.scheduler.pause_jobs(self.tenant).await?;
		self.services.stop().await?;
		self.restarter.gate().notify_stopped();

		info!(tenant = self.tenant.0, "tenant deactivated");
		Ok(())
	}

	/// Starts the tenant's services at node boot. The persisted status is left as is.
	///
	/// # Errors
	///
	/// Propagates the first failing service or restart handler.
	pub async fn start(&self) -> Result<()> {
		let _serial = self.transitions.lock().await;
		let record = self.collaborators.persistence.get_tenant(self.tenant).await?;
		self.observe(record.status);
		debug!(tenant = self.tenant.0, status = %record.status, "starting tenant services");

		let (platform, tenant) = self.contexts(&record);
		self.restarter.prepare_restart(&platform, &tenant).await?;
		self.services.start().await?;
		self.restarter.restart(&platform, &tenant).await?;
		Ok(())
	}

	/// Stops the tenant's services at node shutdown. The persisted status is left as is.
	///
	/// # Errors
	///
	/// Propagates the first failing step.
	pub async fn stop(&self) -> Result<()> {
		let _serial = self.transitions.lock().await;
		debug!(tenant = self.tenant.0, delete_sessions = self.delete_sessions_on_stop, "stopping tenant services");

		if self.delete_sessions_on_stop {
			self.collaborators.sessions.delete_sessions_of_tenant(self.tenant).await?;
		}
		self.services.stop().await?;
		self.restarter.gate().notify_stopped();
		Ok(())
	}

	/// Applies a services state broadcast by another node.
	///
	/// Only local services change; persistence, scheduler, sessions and restart recovery are
	/// handled by the initiating node.
	///
	/// # Errors
	///
	/// Propagates the first failing service.
	pub async fn apply_services_state(&self, state: ServicesState) -> Result<()> {
		let _serial = self.transitions.lock().await;
		debug!(tenant = self.tenant.0, node = %self.node, %state, "applying services state from peer");
		match state {
			ServicesState::Pause => {
				self.restarter.gate().notify_paused();
				self.services.pause().await?;
				self.observe(TenantStatus::Paused);
			}
			ServicesState::Resume => {
				self.services.resume().await?;
				self.observe(TenantStatus::Activated);
			}
		}
		Ok(())
	}

	/// Takes the cluster-wide transition mark of the tenant.
	async fn claim(&self, action: Transition) -> Result<()> {
		let holder = self.collaborators.persistence.begin_transition(self.tenant, self.node).await?;
		match holder {
			None => Ok(()),
			Some(holder) => {
				debug!(tenant = self.tenant.0, %action, %holder, "transition rejected, tenant is busy");
				Err(LifecycleError::TransitionInProgress {
					action,
					tenant: self.tenant,
					holder,
				})
			}
		}
	}

	/// Drops the transition mark, whatever the outcome of the transition.
	async fn release(&self, outcome: Result<()>) -> Result<()> {
		let released = self.collaborators.persistence.end_transition(self.tenant, self.node).await;
		match (outcome, released) {
			(Ok(()), released) => released.map_err(LifecycleError::from),
			(Err(error), Ok(())) => Err(error),
			(Err(error), Err(release)) => {
				warn!(tenant = self.tenant.0, error = %release, "could not clear transition mark");
				Err(error)
			}
		}
	}

	async fn read_guarded(&self, action: Transition, required: TenantStatus) -> Result<TenantRecord> {
		let record = self.collaborators.persistence.get_tenant(self.tenant).await?;
		self.observe(record.status);
		if record.status != required {
			debug!(tenant = self.tenant.0, %action, state = %record.status, "transition rejected");
			return Err(LifecycleError::InvalidTransition { action, state: record.status });
		}
		Ok(record)
	}

	async fn persist(&self, status: TenantStatus) -> Result<()> {
		self.collaborators.persistence.update_tenant(self.tenant, TenantUpdate::status(status)).await?;
		self.observe(status);
		Ok(())
	}

	async fn broadcast(&self, action: Transition, state: ServicesState) -> Result<()> {
		let task = ClusterTask::SetServicesState { tenant: self.tenant, state };
		let report = self
			.broadcaster
			.execute_on_others_and_wait(task, ScopeId::tenant(self.tenant), self.broadcast_timeout)
			.await;
		let failures = report.failures();
		if failures.is_empty() {
			debug!(tenant = self.tenant.0, %state, peers = report.len(), "services state acknowledged by peers");
			return Ok(());
		}
		warn!(tenant = self.tenant.0, %state, %failures, "services state broadcast failed");
		Err(LifecycleError::Cluster {
			action,
			tenant: self.tenant,
			failures,
		})
	}

	/// Persists PAUSED after a failed resume and hands back the original error.
	async fn revert_to_paused(&self, error: LifecycleError) -> LifecycleError {
		warn!(tenant = self.tenant.0, %error, "resume failed, reverting tenant to PAUSED");
		if let Err(revert) = self.persist(TenantStatus::Paused).await {
			warn!(tenant = self.tenant.0, error = %revert, "could not revert tenant to PAUSED");
		}
		error
	}

	fn contexts(&self, record: &TenantRecord) -> (PlatformContext, TenantContext) {
		(
			PlatformContext { node: self.node },
			TenantContext {
				id: record.id,
				name: record.name.clone(),
			},
		)
	}

	fn observe(&self, status: TenantStatus) {
		*self.last_known.lock() = status;
	}
}

#[cfg(test)]
mod tests;

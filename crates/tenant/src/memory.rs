//! In-memory collaborators for embedded nodes and tests.
//!
//! Each collaborator keeps a log of the calls it received so callers can assert on
//! side effects.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use stratum_cluster::NodeId;
use stratum_modules::TenantId;

use crate::collaborators::{CollaboratorError, PersistenceCollaborator, SchedulerCollaborator, SessionCollaborator};
use crate::record::{TenantRecord, TenantStatus, TenantUpdate};

/// Tenant table held in memory.
#[derive(Default)]
pub struct MemoryPersistence {
	tenants: Mutex<HashMap<TenantId, TenantRecord>>,
	updates: Mutex<Vec<(TenantId, TenantUpdate)>>,
	transitions: Mutex<HashMap<TenantId, NodeId>>,
	reads: Mutex<usize>,
}

impl MemoryPersistence {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_tenant(self, record: TenantRecord) -> Self {
		self.insert(record);
		self
	}

	pub fn insert(&self, record: TenantRecord) {
		self.tenants.lock().insert(record.id, record);
	}

	pub fn status_of(&self, id: TenantId) -> Option<TenantStatus> {
		self.tenants.lock().get(&id).map(|r| r.status)
	}

	/// Every update received, in order.
	pub fn updates(&self) -> Vec<(TenantId, TenantUpdate)> {
		self.updates.lock().clone()
	}

	/// Node currently holding the transition mark of `id`.
	pub fn transition_holder(&self, id: TenantId) -> Option<NodeId> {
		self.transitions.lock().get(&id).copied()
	}

	pub fn reads(&self) -> usize {
		*self.reads.lock()
	}
}

#[async_trait]
impl PersistenceCollaborator for MemoryPersistence {
	async fn get_tenant(&self, id: TenantId) -> Result<TenantRecord, CollaboratorError> {
		*self.reads.lock() += 1;
		self.tenants.lock().get(&id).cloned().ok_or(CollaboratorError::NotFound(id))
	}

	async fn update_tenant(&self, id: TenantId, update: TenantUpdate) -> Result<(), CollaboratorError> {
		let mut tenants = self.tenants.lock();
		let record = tenants.get_mut(&id).ok_or(CollaboratorError::NotFound(id))?;
		update.apply(record);
		self.updates.lock().push((id, update));
		Ok(())
	}

	async fn begin_transition(&self, id: TenantId, node: NodeId) -> Result<Option<NodeId>, CollaboratorError> {
		if !self.tenants.lock().contains_key(&id) {
			return Err(CollaboratorError::NotFound(id));
		}
		let mut transitions = self.transitions.lock();
		if let Some(holder) = transitions.get(&id) {
			return Ok(Some(*holder));
		}
		transitions.insert(id, node);
		Ok(None)
	}

	async fn end_transition(&self, id: TenantId, node: NodeId) -> Result<(), CollaboratorError> {
		let mut transitions = self.transitions.lock();
		if transitions.get(&id) == Some(&node) {
			transitions.remove(&id);
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCall {
	Pause(TenantId),
	Resume(TenantId),
}

/// Scheduler that only records calls.
#[derive(Default)]
pub struct MemoryScheduler {
	calls: Mutex<Vec<SchedulerCall>>,
}

impl MemoryScheduler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn calls(&self) -> Vec<SchedulerCall> {
		self.calls.lock().clone()
	}
}

#[async_trait]
impl SchedulerCollaborator for MemoryScheduler {
	async fn pause_jobs(&self, tenant: TenantId) -> Result<(), CollaboratorError> {
		self.calls.lock().push(SchedulerCall::Pause(tenant));
		Ok(())
	}

	async fn resume_jobs(&self, tenant: TenantId) -> Result<(), CollaboratorError> {
		self.calls.lock().push(SchedulerCall::Resume(tenant));
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCall {
	DeleteAll,
	DeleteTenant(TenantId),
	DeleteTenantExceptTechnical(TenantId),
}

/// Session store that only records calls.
#[derive(Default)]
pub struct MemorySessions {
	calls: Mutex<Vec<SessionCall>>,
}

impl MemorySessions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn calls(&self) -> Vec<SessionCall> {
		self.calls.lock().clone()
	}
}

#[async_trait]
impl SessionCollaborator for MemorySessions {
	async fn delete_sessions(&self) -> Result<(), CollaboratorError> {
		self.calls.lock().push(SessionCall::DeleteAll);
		Ok(())
	}

	async fn delete_sessions_of_tenant(&self, tenant: TenantId) -> Result<(), CollaboratorError> {
		self.calls.lock().push(SessionCall::DeleteTenant(tenant));
		Ok(())
	}

	async fn delete_sessions_of_tenant_except_technical_user(&self, tenant: TenantId) -> Result<(), CollaboratorError> {
		self.calls.lock().push(SessionCall::DeleteTenantExceptTechnical(tenant));
		Ok(())
	}
}

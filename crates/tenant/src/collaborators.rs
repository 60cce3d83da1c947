//! Narrow interfaces to the platform services the tenant runtime drives.
//!
//! Persistence, job scheduling and session storage live outside this crate. The runtime
//! only needs the handful of calls below.

use async_trait::async_trait;
use stratum_cluster::NodeId;
use stratum_modules::TenantId;
use thiserror::Error;

use crate::record::{TenantRecord, TenantUpdate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
	#[error("tenant {0} not found")]
	NotFound(TenantId),
	#[error("{0}")]
	Failed(String),
}

/// Source of truth for tenant rows.
#[async_trait]
pub trait PersistenceCollaborator: Send + Sync {
	async fn get_tenant(&self, id: TenantId) -> Result<TenantRecord, CollaboratorError>;

	/// Applies `update` to the row. Last write wins.
	async fn update_tenant(&self, id: TenantId, update: TenantUpdate) -> Result<(), CollaboratorError>;

	/// Marks `id` as moved by a cluster-wide transition started on `node`.
	///
	/// Returns the node already holding the mark; the mark is then left untouched. The check
	/// and the write must be atomic across every node sharing the row.
	async fn begin_transition(&self, id: TenantId, node: NodeId) -> Result<Option<NodeId>, CollaboratorError>;

	/// Clears the mark `node` set with `begin_transition`. A mark held by another node is kept.
	async fn end_transition(&self, id: TenantId, node: NodeId) -> Result<(), CollaboratorError>;
}

/// Job scheduler for a tenant's background work.
#[async_trait]
pub trait SchedulerCollaborator: Send + Sync {
	async fn pause_jobs(&self, tenant: TenantId) -> Result<(), CollaboratorError>;

	async fn resume_jobs(&self, tenant: TenantId) -> Result<(), CollaboratorError>;
}

/// HTTP/API session store.
#[async_trait]
pub trait SessionCollaborator: Send + Sync {
	/// Drops every session of every tenant.
	async fn delete_sessions(&self) -> Result<(), CollaboratorError>;

	async fn delete_sessions_of_tenant(&self, tenant: TenantId) -> Result<(), CollaboratorError>;

	/// Drops the tenant's sessions but keeps the technical user's.
	async fn delete_sessions_of_tenant_except_technical_user(&self, tenant: TenantId) -> Result<(), CollaboratorError>;
}

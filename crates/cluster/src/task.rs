//! Units of work replayed on peer nodes.

use std::fmt;

use serde::{Deserialize, Serialize};
use stratum_modules::{ResourceStream, ScopeContext, ScopeId, TenantId};

/// Identity of one cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "node-{}", self.0)
	}
}

/// Target state of a tenant's services on a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServicesState {
	Pause,
	Resume,
}

impl fmt::Display for ServicesState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Pause => "PAUSE",
			Self::Resume => "RESUME",
		})
	}
}

/// New content for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRefresh {
	pub scope: ScopeId,
	pub resources: ResourceStream,
}

/// Every scope refreshed by one committed transaction for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshBatch {
	pub tenant: Option<TenantId>,
	pub scopes: Vec<ScopeRefresh>,
}

impl RefreshBatch {
	pub fn context(&self) -> ScopeContext {
		ScopeContext::from(self.tenant)
	}

	pub fn scope_ids(&self) -> Vec<ScopeId> {
		self.scopes.iter().map(|s| s.scope).collect()
	}
}

/// Serializable unit of work executed on every other node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterTask {
	/// Rebuild and swap the listed scopes.
	RefreshScopes(RefreshBatch),
	/// Pause or resume a tenant's local services.
	SetServicesState { tenant: TenantId, state: ServicesState },
}

impl ClusterTask {
	/// Scope the task is addressed to, used for routing and log context.
	pub fn scope(&self) -> ScopeId {
		match self {
			Self::RefreshScopes(batch) => batch.tenant.map_or(ScopeId::GLOBAL, ScopeId::tenant),
			Self::SetServicesState { tenant, .. } => ScopeId::tenant(*tenant),
		}
	}

	/// Short name for logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::RefreshScopes(_) => "refresh-scopes",
			Self::SetServicesState { .. } => "set-services-state",
		}
	}
}

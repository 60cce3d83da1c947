use stratum_cluster::NodeFailures;
use stratum_modules::{ModuleError, ScopeId, TenantId};
use stratum_tenant::LifecycleError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::tx::TransactionId;

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error(transparent)]
	Module(#[from] ModuleError),

	#[error(transparent)]
	Lifecycle(#[from] LifecycleError),

	/// Scopes were swapped locally but at least one peer did not apply them.
	///
	/// The cluster is inconsistent until an operator intervenes; nothing is retried.
	#[error("refresh of {} scope(s) not acknowledged by {failures}", scopes.len())]
	Refresh { scopes: Vec<ScopeId>, failures: NodeFailures },

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("transaction {0} already completed")]
	TransactionCompleted(TransactionId),

	#[error("no runtime registered for tenant {0}")]
	UnknownTenant(TenantId),
}

impl RuntimeError {
	/// True when a peer failed by timing out rather than by reporting an error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Self::Refresh { failures, .. } => failures.any_timeout(),
			Self::Lifecycle(error) => error.is_timeout(),
			_ => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

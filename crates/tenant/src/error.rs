use std::fmt;

use stratum_cluster::{NodeFailures, NodeId};
use stratum_modules::{ModuleError, TenantId};
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::record::TenantStatus;

/// Operation requested on a tenant runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
	Pause,
	Resume,
	Activate,
	Deactivate,
	Start,
	Stop,
}

impl Transition {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pause => "pause",
			Self::Resume => "resume",
			Self::Activate => "activate",
			Self::Deactivate => "deactivate",
			Self::Start => "start",
			Self::Stop => "stop",
		}
	}
}

impl fmt::Display for Transition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Hook invoked on a [`crate::LifecycleService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAction {
	Start,
	Stop,
	Pause,
	Resume,
}

impl fmt::Display for ServiceAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Start => "start",
			Self::Stop => "stop",
			Self::Pause => "pause",
			Self::Resume => "resume",
		})
	}
}

#[derive(Debug, Error)]
pub enum LifecycleError {
	/// Guard rejected the transition; nothing was changed.
	#[error("can't {action} a tenant in state {state}")]
	InvalidTransition { action: Transition, state: TenantStatus },
	#[error("tenant {0} not found")]
	TenantNotFound(TenantId),
	/// Another node is moving the tenant; nothing was changed.
	#[error("can't {action} tenant {tenant} while a transition started on {holder} is in progress")]
	TransitionInProgress {
		action: Transition,
		tenant: TenantId,
		holder: NodeId,
	},
	/// At least one peer did not acknowledge the services-state broadcast.
	#[error("{action} of tenant {tenant} not acknowledged by {failures}")]
	Cluster {
		action: Transition,
		tenant: TenantId,
		failures: NodeFailures,
	},
	#[error("service {service} failed to {action}: {message}")]
	Service {
		service: String,
		action: ServiceAction,
		message: String,
	},
	#[error("restart handler {handler} failed: {message}")]
	RestartHandler { handler: String, message: String },
	#[error(transparent)]
	Collaborator(CollaboratorError),
	#[error(transparent)]
	Module(#[from] ModuleError),
}

impl LifecycleError {
	/// Guard failures and missing tenants are reported, never retried.
	pub fn is_configuration(&self) -> bool {
		match self {
			Self::InvalidTransition { .. } | Self::TenantNotFound(_) => true,
			Self::Module(error) => error.is_configuration(),
			_ => false,
		}
	}

	/// True when a peer failed by timing out rather than by reporting an error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Cluster { failures, .. } if failures.any_timeout())
	}
}

impl From<CollaboratorError> for LifecycleError {
	fn from(error: CollaboratorError) -> Self {
		match error {
			CollaboratorError::NotFound(id) => Self::TenantNotFound(id),
			other => Self::Collaborator(other),
		}
	}
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

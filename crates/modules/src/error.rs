//! Error types for scope resolution and module materialization.

use std::path::PathBuf;

use thiserror::Error;

use crate::scope::ScopeId;

/// Errors raised by the module registry and its builders.
#[derive(Debug, Error)]
pub enum ModuleError {
	/// A scope cannot be torn down while child scopes still delegate to it.
	#[error("can't destroy {scope}: live child scopes {}", format_scopes(.children))]
	HasChildren {
		/// Scope whose destruction was refused.
		scope: ScopeId,
		/// Children registered at the time of the call.
		children: Vec<ScopeId>,
	},

	/// A process scope was resolved without a tenant to delegate to.
	#[error("no tenant context available to resolve the parent of {scope}")]
	MissingTenantContext {
		/// Scope whose parent could not be computed.
		scope: ScopeId,
	},

	/// The resource was found neither in the scope nor in any ancestor.
	#[error("resource '{name}' not found in {scope} or its parents")]
	ResourceNotFound {
		/// Requested resource name.
		name: String,
		/// Scope where the lookup started.
		scope: ScopeId,
	},

	/// Work directory creation, write or read failed.
	#[error("I/O error on {path}: {error}")]
	Io {
		/// Path that failed.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A bundle pattern did not compile.
	#[error("invalid bundle pattern '{pattern}': {error}")]
	InvalidPattern {
		/// The offending glob.
		pattern: String,
		/// Glob compiler error.
		error: globset::Error,
	},

	/// A module was published on a scope whose handle delegates elsewhere.
	#[error("module for {scope} delegates to {}, but the scope delegates to {}", format_parent(.found), format_parent(.expected))]
	ParentMismatch {
		/// Scope being swapped.
		scope: ScopeId,
		/// Parent of the registered handle.
		expected: Option<ScopeId>,
		/// Parent the module was built against.
		found: Option<ScopeId>,
	},

	/// The module backing a scope was released and its files are gone.
	#[error("module for {scope} has been released")]
	Released {
		/// Scope of the released module.
		scope: ScopeId,
	},
}

impl ModuleError {
	pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
		Self::Io { path: path.into(), error }
	}

	/// Returns true for errors caused by wiring mistakes rather than runtime conditions.
	///
	/// Configuration errors are never worth retrying.
	pub fn is_configuration(&self) -> bool {
		matches!(
			self,
			Self::HasChildren { .. } | Self::MissingTenantContext { .. } | Self::InvalidPattern { .. } | Self::ParentMismatch { .. }
		)
	}
}

fn format_scopes(scopes: &[ScopeId]) -> String {
	let names: Vec<String> = scopes.iter().map(ToString::to_string).collect();
	format!("[{}]", names.join(", "))
}

fn format_parent(parent: &Option<ScopeId>) -> String {
	parent.map_or_else(|| "nothing".to_string(), |p| p.to_string())
}

/// Result type for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;

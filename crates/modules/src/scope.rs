//! Scope identities and the parent-delegation graph.
//!
//! The isolation hierarchy has exactly three levels: one global root, one scope per
//! tenant, one scope per deployed process. [`ScopeId::parent`] is the only edge function;
//! it strictly decreases [`ScopeKind::rank`], so cycles are not representable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};

/// Tenant identifier as stored by the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Level of a scope in the isolation hierarchy.
///
/// Declaration order is the total order used by [`ScopeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
	Global,
	Tenant,
	Process,
}

impl ScopeKind {
	/// Depth of this kind below the root.
	pub const fn rank(self) -> u8 {
		match self {
			Self::Global => 0,
			Self::Tenant => 1,
			Self::Process => 2,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Global => "global",
			Self::Tenant => "tenant",
			Self::Process => "process",
		}
	}
}

/// Identity of one node in the isolation hierarchy.
///
/// Ordered by kind, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId {
	kind: ScopeKind,
	id: i64,
}

impl ScopeId {
	/// The single well-known root scope.
	pub const GLOBAL: Self = Self {
		kind: ScopeKind::Global,
		id: -1,
	};

	/// Scope holding the modules shared by every process of a tenant.
	pub const fn tenant(tenant: TenantId) -> Self {
		Self {
			kind: ScopeKind::Tenant,
			id: tenant.0,
		}
	}

	/// Scope of one deployed process definition.
	pub const fn process(process_id: i64) -> Self {
		Self {
			kind: ScopeKind::Process,
			id: process_id,
		}
	}

	pub const fn kind(self) -> ScopeKind {
		self.kind
	}

	pub const fn id(self) -> i64 {
		self.id
	}

	pub const fn is_root(self) -> bool {
		matches!(self.kind, ScopeKind::Global)
	}

	/// Resolves the scope this one delegates to.
	///
	/// Process scopes delegate to the tenant named by `ctx`; tenant scopes delegate to
	/// [`Self::GLOBAL`]; the root has no parent.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::MissingTenantContext`] when a process scope is resolved
	/// without a tenant.
	pub fn parent(self, ctx: &ScopeContext) -> Result<Option<Self>> {
		match self.kind {
			ScopeKind::Global => Ok(None),
			ScopeKind::Tenant => Ok(Some(Self::GLOBAL)),
			ScopeKind::Process => ctx
				.tenant()
				.map(|tenant| Some(Self::tenant(tenant)))
				.ok_or(ModuleError::MissingTenantContext { scope: self }),
		}
	}

	/// Filesystem-safe label used for work directory prefixes.
	pub fn slug(self) -> String {
		match self.kind {
			ScopeKind::Global => "global".to_string(),
			kind => format!("{}-{}", kind.as_str(), self.id),
		}
	}
}

impl fmt::Display for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.kind {
			ScopeKind::Global => f.write_str("global"),
			kind => write!(f, "{}:{}", kind.as_str(), self.id),
		}
	}
}

/// Explicit tenant context threaded through scope resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeContext {
	tenant: Option<TenantId>,
}

impl ScopeContext {
	/// Context with no tenant; only global and tenant scopes resolve under it.
	pub const fn platform() -> Self {
		Self { tenant: None }
	}

	pub const fn for_tenant(tenant: TenantId) -> Self {
		Self { tenant: Some(tenant) }
	}

	pub const fn tenant(&self) -> Option<TenantId> {
		self.tenant
	}
}

impl From<Option<TenantId>> for ScopeContext {
	fn from(tenant: Option<TenantId>) -> Self {
		Self { tenant }
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn root_has_no_parent() {
		assert_eq!(ScopeId::GLOBAL.parent(&ScopeContext::platform()).ok().flatten(), None);
	}

	#[test]
	fn tenant_delegates_to_global() {
		let scope = ScopeId::tenant(TenantId(7));
		assert_eq!(scope.parent(&ScopeContext::platform()).ok().flatten(), Some(ScopeId::GLOBAL));
	}

	#[test]
	fn process_without_tenant_is_configuration_error() {
		let err = ScopeId::process(3).parent(&ScopeContext::platform()).unwrap_err();
		assert!(matches!(err, ModuleError::MissingTenantContext { scope } if scope == ScopeId::process(3)));
		assert!(err.is_configuration());
	}

	#[test]
	fn ordering_is_kind_then_id() {
		let mut scopes = vec![ScopeId::process(1), ScopeId::tenant(TenantId(9)), ScopeId::GLOBAL, ScopeId::tenant(TenantId(2))];
		scopes.sort();
		assert_eq!(scopes, vec![ScopeId::GLOBAL, ScopeId::tenant(TenantId(2)), ScopeId::tenant(TenantId(9)), ScopeId::process(1)]);
	}

	#[test]
	fn display_and_slug() {
		assert_eq!(ScopeId::GLOBAL.to_string(), "global");
		assert_eq!(ScopeId::process(42).to_string(), "process:42");
		assert_eq!(ScopeId::tenant(TenantId(-3)).slug(), "tenant--3");
	}

	fn any_scope() -> impl Strategy<Value = ScopeId> {
		prop_oneof![
			Just(ScopeId::GLOBAL),
			any::<i64>().prop_map(|id| ScopeId::tenant(TenantId(id))),
			any::<i64>().prop_map(ScopeId::process),
		]
	}

	proptest! {
		#[test]
		fn parent_chain_reaches_root_with_decreasing_rank(scope in any_scope(), tenant in any::<i64>()) {
			let ctx = ScopeContext::for_tenant(TenantId(tenant));
			let mut current = scope;
			let mut steps = 0;
			while let Some(parent) = current.parent(&ctx).unwrap() {
				prop_assert!(parent.kind().rank() < current.kind().rank());
				current = parent;
				steps += 1;
			}
			prop_assert_eq!(current, ScopeId::GLOBAL);
			prop_assert_eq!(steps, usize::from(scope.kind().rank()));
		}
	}
}

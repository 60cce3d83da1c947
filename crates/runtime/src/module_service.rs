use std::sync::Arc;

use async_trait::async_trait;
use stratum_modules::{ModuleRegistry, ScopeContext, ScopeId, TenantId};
use stratum_tenant::LifecycleService;
use tracing::debug;

/// Ties a tenant's module scope to the tenant lifecycle.
///
/// Start and resume ensure the tenant scope exists; stop tears the tenant's scope tree down,
/// process scopes first. Pause leaves modules loaded.
pub struct TenantModuleService {
	registry: Arc<ModuleRegistry>,
	tenant: TenantId,
}

impl TenantModuleService {
	pub const NAME: &'static str = "module-registry";

	pub fn new(registry: Arc<ModuleRegistry>, tenant: TenantId) -> Self {
		Self { registry, tenant }
	}

	fn ensure_scope(&self) -> Result<(), String> {
		self.registry
			.get_or_create(ScopeId::tenant(self.tenant), &ScopeContext::for_tenant(self.tenant))
			.map(|_| ())
			.map_err(|e| e.to_string())
	}
}

#[async_trait]
impl LifecycleService for TenantModuleService {
	fn name(&self) -> &str {
		Self::NAME
	}

	async fn start(&self) -> Result<(), String> {
		self.ensure_scope()
	}

	async fn stop(&self) -> Result<(), String> {
		let scope = ScopeId::tenant(self.tenant);
		debug!(%scope, descendants = self.registry.descendants(scope).len(), "tearing down tenant modules");
		self.registry.destroy_tree(scope).map_err(|e| e.to_string())
	}

	async fn pause(&self) -> Result<(), String> {
		Ok(())
	}

	async fn resume(&self) -> Result<(), String> {
		self.ensure_scope()
	}
}

//! One cluster member: module registry, refresh coordinator and tenant runtimes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use stratum_cluster::{ClusterBroadcaster, ClusterTask, ClusterTaskHandler, NodeId};
use stratum_modules::{ModuleRegistry, TenantId};
use stratum_tenant::{TenantCollaborators, TenantRuntime, TenantRuntimeBuilder};
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::module_service::TenantModuleService;
use crate::refresh::RefreshCoordinator;

pub struct Node {
	id: NodeId,
	registry: Arc<ModuleRegistry>,
	refresh: RefreshCoordinator,
	broadcaster: Arc<dyn ClusterBroadcaster>,
	tenant_timeout: Duration,
	delete_sessions_on_stop: bool,
	tenants: RwLock<BTreeMap<TenantId, Arc<TenantRuntime>>>,
}

impl Node {
	/// Builds a node sending through `broadcaster`.
	///
	/// # Errors
	///
	/// Returns [`RuntimeError::Config`] when the bundle patterns do not compile.
	pub fn new(config: &RuntimeConfig, broadcaster: Arc<dyn ClusterBroadcaster>) -> Result<Self> {
		let registry = Arc::new(ModuleRegistry::new());
		let refresh = RefreshCoordinator::new(Arc::clone(&registry), config.module_builder()?, Arc::clone(&broadcaster), config.refresh_timeout());
		let id = broadcaster.local_node();
		debug!(node = %id, refresh_timeout = ?config.refresh_timeout(), "node created");
		Ok(Self {
			id,
			registry,
			refresh,
			broadcaster,
			tenant_timeout: config.tenant_timeout(),
			delete_sessions_on_stop: config.tenant.delete_sessions_on_stop,
			tenants: RwLock::new(BTreeMap::new()),
		})
	}

	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn registry(&self) -> &Arc<ModuleRegistry> {
		&self.registry
	}

	pub fn refresh(&self) -> &RefreshCoordinator {
		&self.refresh
	}

	/// Builds and registers the runtime of `tenant`.
	///
	/// The tenant's module scope is the first service; `configure` appends further services
	/// and restart handlers.
	///
	/// # Errors
	///
	/// Returns [`RuntimeError::Lifecycle`] when the tenant record cannot be read.
	pub async fn add_tenant(
		&self,
		tenant: TenantId,
		collaborators: TenantCollaborators,
		configure: impl FnOnce(TenantRuntimeBuilder) -> TenantRuntimeBuilder,
	) -> Result<Arc<TenantRuntime>> {
		let builder = TenantRuntime::builder(tenant, collaborators, Arc::clone(&self.broadcaster))
			.broadcast_timeout(self.tenant_timeout)
			.delete_sessions_on_stop(self.delete_sessions_on_stop)
			.service(Arc::new(TenantModuleService::new(Arc::clone(&self.registry), tenant)));
		let runtime = Arc::new(configure(builder).build().await?);
		self.tenants.write().insert(tenant, Arc::clone(&runtime));
		info!(node = %self.id, tenant = tenant.0, status = %runtime.last_known_status(), "tenant registered");
		Ok(runtime)
	}

	/// Runtime of `tenant` on this node.
	///
	/// # Errors
	///
	/// Returns [`RuntimeError::UnknownTenant`] when the tenant was never added.
	pub fn tenant(&self, tenant: TenantId) -> Result<Arc<TenantRuntime>> {
		self.tenants.read().get(&tenant).cloned().ok_or(RuntimeError::UnknownTenant(tenant))
	}

	pub fn tenants(&self) -> Vec<TenantId> {
		self.tenants.read().keys().copied().collect()
	}

	/// Starts every tenant's services, in tenant id order.
	///
	/// # Errors
	///
	/// Stops at the first tenant that fails to start.
	pub async fn start(&self) -> Result<()> {
		for runtime in self.runtimes() {
			runtime.start().await?;
		}
		info!(node = %self.id, tenants = self.tenants.read().len(), "node started");
		Ok(())
	}

	/// Stops every tenant's services, in tenant id order.
	///
	/// # Errors
	///
	/// Stops at the first tenant that fails to stop.
	pub async fn stop(&self) -> Result<()> {
		for runtime in self.runtimes() {
			runtime.stop().await?;
		}
		info!(node = %self.id, "node stopped");
		Ok(())
	}

	/// Executes a task received from another node.
	///
	/// # Errors
	///
	/// Returns the refresh or lifecycle failure, or [`RuntimeError::UnknownTenant`].
	pub async fn handle_task(&self, task: ClusterTask) -> Result<()> {
		debug!(node = %self.id, task = task.kind(), scope = %task.scope(), "handling cluster task");
		match task {
			ClusterTask::RefreshScopes(batch) => {
				self.refresh.apply_remote(&batch)?;
			}
			ClusterTask::SetServicesState { tenant, state } => {
				self.tenant(tenant)?.apply_services_state(state).await?;
			}
		}
		Ok(())
	}

	fn runtimes(&self) -> Vec<Arc<TenantRuntime>> {
		self.tenants.read().values().cloned().collect()
	}
}

#[async_trait]
impl ClusterTaskHandler for Node {
	async fn handle(&self, task: ClusterTask) -> std::result::Result<(), String> {
		self.handle_task(task).await.map_err(|e| e.to_string())
	}
}

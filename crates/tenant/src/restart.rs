//! Once-per-activation recovery of in-flight work.
//!
//! # Mental model
//!
//! - Recovery is split in two: handlers enumerate in-flight work *before* services start,
//!   then resubmit it *after* every service is live.
//! - The [`RestartGate`] is armed when the runtime starts and re-armed by every stop or
//!   pause. The first restart of an activation episode disarms it; later start/resume calls
//!   in the same episode skip recovery.
//!
//! # Concurrency & ordering
//!
//! - The gate is only touched from inside the owning runtime's serialized transitions.
//!   Atomics make it safe to read from status queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use stratum_cluster::NodeId;
use stratum_modules::TenantId;
use tracing::{debug, info};

use crate::error::{LifecycleError, Result};

/// Process-local flag: should the next start recover in-flight work.
#[derive(Debug)]
pub struct RestartGate {
	should_restart: AtomicBool,
}

impl Default for RestartGate {
	fn default() -> Self {
		Self {
			should_restart: AtomicBool::new(true),
		}
	}
}

impl RestartGate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn should_restart_elements(&self) -> bool {
		self.should_restart.load(Ordering::Acquire)
	}

	/// Claims the pending restart. Returns true for exactly one caller per episode.
	pub fn will_restart_elements(&self) -> bool {
		self.should_restart.swap(false, Ordering::AcqRel)
	}

	pub fn notify_elements_are_restarted(&self) {
		self.should_restart.store(false, Ordering::Release);
	}

	/// Re-arms the gate after a stop.
	pub fn notify_stopped(&self) {
		self.should_restart.store(true, Ordering::Release);
	}

	/// Re-arms the gate after a pause.
	pub fn notify_paused(&self) {
		self.should_restart.store(true, Ordering::Release);
	}
}

/// Node-level facts handed to restart handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformContext {
	pub node: NodeId,
}

/// Tenant-level facts handed to restart handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
	pub id: TenantId,
	pub name: String,
}

/// Recovers one kind of in-flight work item.
#[async_trait]
pub trait TenantRestartHandler: Send + Sync {
	fn name(&self) -> &str;

	/// Enumerates work to recover. Services are not running yet.
	async fn before_services_start(&self, platform: &PlatformContext, tenant: &TenantContext) -> std::result::Result<(), String>;

	/// Resubmits the enumerated work. Every service is running.
	async fn after_services_start(&self, platform: &PlatformContext, tenant: &TenantContext) -> std::result::Result<(), String>;
}

/// Runs the restart handlers of one tenant behind its [`RestartGate`].
#[derive(Clone)]
pub struct TenantElementsRestarter {
	gate: Arc<RestartGate>,
	handlers: Vec<Arc<dyn TenantRestartHandler>>,
}

impl TenantElementsRestarter {
	pub fn new(gate: Arc<RestartGate>, handlers: Vec<Arc<dyn TenantRestartHandler>>) -> Self {
		Self { gate, handlers }
	}

	pub fn gate(&self) -> &Arc<RestartGate> {
		&self.gate
	}

	/// Runs `before_services_start` on every handler if a restart is pending.
	///
	/// Returns whether the handlers ran.
	pub async fn prepare_restart(&self, platform: &PlatformContext, tenant: &TenantContext) -> Result<bool> {
		if !self.gate.should_restart_elements() {
			debug!(tenant = tenant.id.0, "no restart pending, skipping preparation");
			return Ok(false);
		}
		for handler in &self.handlers {
			handler.before_services_start(platform, tenant).await.map_err(|message| LifecycleError::RestartHandler {
				handler: handler.name().to_string(),
				message,
			})?;
		}
		Ok(true)
	}

	/// Runs `after_services_start` on every handler if this call claims the pending restart.
	///
	/// Returns whether the handlers ran.
	pub async fn restart(&self, platform: &PlatformContext, tenant: &TenantContext) -> Result<bool> {
		if !self.gate.will_restart_elements() {
			return Ok(false);
		}
		for handler in &self.handlers {
			handler.after_services_start(platform, tenant).await.map_err(|message| LifecycleError::RestartHandler {
				handler: handler.name().to_string(),
				message,
			})?;
		}
		self.gate.notify_elements_are_restarted();
		info!(tenant = tenant.id.0, node = %platform.node, handlers = self.handlers.len(), "restarted tenant elements");
		Ok(true)
	}
}

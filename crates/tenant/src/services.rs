//! Pluggable per-tenant services sequenced by the runtime.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{LifecycleError, Result, ServiceAction};

/// Subordinate component owned by a tenant runtime.
#[async_trait]
pub trait LifecycleService: Send + Sync {
	fn name(&self) -> &str;

	async fn start(&self) -> std::result::Result<(), String>;

	async fn stop(&self) -> std::result::Result<(), String>;

	async fn pause(&self) -> std::result::Result<(), String>;

	async fn resume(&self) -> std::result::Result<(), String>;
}

/// Ordered set of a tenant's services.
///
/// Every action runs in registration order, stop and pause included, and stops at the
/// first failing service.
#[derive(Clone, Default)]
pub struct TenantServices {
	services: Vec<Arc<dyn LifecycleService>>,
}

impl TenantServices {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, service: Arc<dyn LifecycleService>) {
		self.services.push(service);
	}

	pub fn names(&self) -> Vec<&str> {
		self.services.iter().map(|s| s.name()).collect()
	}

	pub fn len(&self) -> usize {
		self.services.len()
	}

	pub fn is_empty(&self) -> bool {
		self.services.is_empty()
	}

	pub async fn start(&self) -> Result<()> {
		self.run(ServiceAction::Start).await
	}

	pub async fn stop(&self) -> Result<()> {
		self.run(ServiceAction::Stop).await
	}

	pub async fn pause(&self) -> Result<()> {
		self.run(ServiceAction::Pause).await
	}

	pub async fn resume(&self) -> Result<()> {
		self.run(ServiceAction::Resume).await
	}

	async fn run(&self, action: ServiceAction) -> Result<()> {
		for service in &self.services {
			let outcome = match action {
				ServiceAction::Start => service.start().await,
				ServiceAction::Stop => service.stop().await,
				ServiceAction::Pause => service.pause().await,
				ServiceAction::Resume => service.resume().await,
			};
			outcome.map_err(|message| LifecycleError::Service {
				service: service.name().to_string(),
				action,
				message,
			})?;
			debug!(service = service.name(), %action, "tenant service done");
		}
		Ok(())
	}
}

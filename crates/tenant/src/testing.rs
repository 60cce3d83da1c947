//! Recording doubles for services and restart handlers.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ServiceAction;
use crate::restart::{PlatformContext, TenantContext, TenantRestartHandler};
use crate::services::LifecycleService;

/// Call log shared by several [`RecordingService`]s to observe cross-service ordering.
pub type ServiceLog = Arc<Mutex<Vec<(String, ServiceAction)>>>;

pub fn service_log() -> ServiceLog {
	Arc::new(Mutex::new(Vec::new()))
}

/// Service that appends every hook call to a shared log.
pub struct RecordingService {
	name: String,
	log: ServiceLog,
	fail_on: Option<ServiceAction>,
}

impl RecordingService {
	pub fn new(name: impl Into<String>, log: &ServiceLog) -> Self {
		Self {
			name: name.into(),
			log: Arc::clone(log),
			fail_on: None,
		}
	}

	/// Fails `action` after logging it.
	pub fn failing_on(mut self, action: ServiceAction) -> Self {
		self.fail_on = Some(action);
		self
	}

	fn record(&self, action: ServiceAction) -> Result<(), String> {
		self.log.lock().push((self.name.clone(), action));
		if self.fail_on == Some(action) {
			return Err(format!("{} refused to {action}", self.name));
		}
		Ok(())
	}
}

#[async_trait]
impl LifecycleService for RecordingService {
	fn name(&self) -> &str {
		&self.name
	}

	async fn start(&self) -> Result<(), String> {
		self.record(ServiceAction::Start)
	}

	async fn stop(&self) -> Result<(), String> {
		self.record(ServiceAction::Stop)
	}

	async fn pause(&self) -> Result<(), String> {
		self.record(ServiceAction::Pause)
	}

	async fn resume(&self) -> Result<(), String> {
		self.record(ServiceAction::Resume)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
	BeforeServicesStart,
	AfterServicesStart,
}

/// Restart handler that records its phases.
#[derive(Default)]
pub struct RecordingRestartHandler {
	calls: Mutex<Vec<RestartPhase>>,
	fail_before: bool,
}

impl RecordingRestartHandler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn failing_before_start() -> Self {
		Self {
			calls: Mutex::new(Vec::new()),
			fail_before: true,
		}
	}

	pub fn calls(&self) -> Vec<RestartPhase> {
		self.calls.lock().clone()
	}
}

#[async_trait]
impl TenantRestartHandler for RecordingRestartHandler {
	fn name(&self) -> &str {
		"recording"
	}

	async fn before_services_start(&self, _platform: &PlatformContext, _tenant: &TenantContext) -> Result<(), String> {
		self.calls.lock().push(RestartPhase::BeforeServicesStart);
		if self.fail_before {
			return Err("cannot enumerate in-flight work".into());
		}
		Ok(())
	}

	async fn after_services_start(&self, _platform: &PlatformContext, _tenant: &TenantContext) -> Result<(), String> {
		self.calls.lock().push(RestartPhase::AfterServicesStart);
		Ok(())
	}
}

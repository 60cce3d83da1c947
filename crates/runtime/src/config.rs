//! Node configuration loaded from TOML.
//!
//! ```toml
//! [node]
//! id = 1
//!
//! [refresh]
//! broadcast_timeout_secs = 300
//! work_root = "/var/tmp/stratum"
//! bundle_patterns = ["*.jar"]
//!
//! [tenant]
//! broadcast_timeout_secs = 300
//! delete_sessions_on_stop = true
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use stratum_cluster::{DEFAULT_BROADCAST_TIMEOUT, NodeId};
use stratum_modules::{BundleClassifier, DEFAULT_BUNDLE_PATTERNS, ModuleBuilder, ModuleError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("invalid bundle pattern: {0}")]
	Pattern(#[from] ModuleError),

	#[error("{field} must be greater than zero")]
	ZeroTimeout { field: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	pub node: NodeSection,
	pub refresh: RefreshSection,
	pub tenant: TenantSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
	pub id: u64,
}

impl Default for NodeSection {
	fn default() -> Self {
		Self { id: 1 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshSection {
	pub broadcast_timeout_secs: u64,
	/// Parent of per-module work directories; the system temp dir when unset.
	pub work_root: Option<PathBuf>,
	pub bundle_patterns: Vec<String>,
}

impl Default for RefreshSection {
	fn default() -> Self {
		Self {
			broadcast_timeout_secs: DEFAULT_BROADCAST_TIMEOUT.as_secs(),
			work_root: None,
			bundle_patterns: DEFAULT_BUNDLE_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenantSection {
	pub broadcast_timeout_secs: u64,
	pub delete_sessions_on_stop: bool,
}

impl Default for TenantSection {
	fn default() -> Self {
		Self {
			broadcast_timeout_secs: DEFAULT_BROADCAST_TIMEOUT.as_secs(),
			delete_sessions_on_stop: true,
		}
	}
}

impl RuntimeConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses `path`.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.refresh.broadcast_timeout_secs == 0 {
			return Err(ConfigError::ZeroTimeout {
				field: "refresh.broadcast_timeout_secs",
			});
		}
		if self.tenant.broadcast_timeout_secs == 0 {
			return Err(ConfigError::ZeroTimeout {
				field: "tenant.broadcast_timeout_secs",
			});
		}
		BundleClassifier::new(&self.refresh.bundle_patterns)?;
		Ok(())
	}

	pub fn node_id(&self) -> NodeId {
		NodeId(self.node.id)
	}

	pub fn refresh_timeout(&self) -> Duration {
		Duration::from_secs(self.refresh.broadcast_timeout_secs)
	}

	pub fn tenant_timeout(&self) -> Duration {
		Duration::from_secs(self.tenant.broadcast_timeout_secs)
	}

	/// Module builder with the configured bundle patterns and work root.
	pub fn module_builder(&self) -> Result<ModuleBuilder, ConfigError> {
		let builder = ModuleBuilder::new(BundleClassifier::new(&self.refresh.bundle_patterns)?);
		Ok(match &self.refresh.work_root {
			Some(root) => builder.work_root(root),
			None => builder,
		})
	}
}

//! Persisted tenant row.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use stratum_modules::TenantId;

/// Persisted activation state of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantStatus {
	Activated,
	Paused,
	Deactivated,
}

impl TenantStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Activated => "ACTIVATED",
			Self::Paused => "PAUSED",
			Self::Deactivated => "DEACTIVATED",
		}
	}
}

impl fmt::Display for TenantStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Authoritative tenant row held by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
	pub id: TenantId,
	pub status: TenantStatus,
	pub name: String,
	#[serde(default)]
	pub metadata: BTreeMap<String, String>,
}

impl TenantRecord {
	pub fn new(id: TenantId, name: impl Into<String>, status: TenantStatus) -> Self {
		Self {
			id,
			status,
			name: name.into(),
			metadata: BTreeMap::new(),
		}
	}
}

/// Field diff applied by `PersistenceCollaborator::update_tenant`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUpdate {
	pub status: Option<TenantStatus>,
	pub name: Option<String>,
	pub metadata: Option<BTreeMap<String, String>>,
}

impl TenantUpdate {
	pub fn status(status: TenantStatus) -> Self {
		Self {
			status: Some(status),
			..Self::default()
		}
	}

	pub fn is_empty(&self) -> bool {
		self.status.is_none() && self.name.is_none() && self.metadata.is_none()
	}

	/// Applies the diff in place. Later writes win.
	pub fn apply(&self, record: &mut TenantRecord) {
		if let Some(status) = self.status {
			record.status = status;
		}
		if let Some(name) = &self.name {
			record.name.clone_from(name);
		}
		if let Some(metadata) = &self.metadata {
			record.metadata.clone_from(metadata);
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn update_touches_only_given_fields() {
		let mut record = TenantRecord::new(TenantId(3), "acme", TenantStatus::Activated);
		record.metadata.insert("region".into(), "eu".into());

		TenantUpdate::status(TenantStatus::Paused).apply(&mut record);

		assert_eq!(record.status, TenantStatus::Paused);
		assert_eq!(record.name, "acme");
		assert_eq!(record.metadata.get("region").map(String::as_str), Some("eu"));
	}

	#[test]
	fn status_renders_uppercase() {
		assert_eq!(TenantStatus::Deactivated.to_string(), "DEACTIVATED");
		assert!(TenantUpdate::default().is_empty());
	}
}

//! Resource streams and bundle classification.

use bytes::Bytes;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ModuleError, Result};

/// Patterns classifying a resource as a binary bundle when none are configured.
pub const DEFAULT_BUNDLE_PATTERNS: &[&str] = &["*.jar"];

/// One named payload of a [`ResourceStream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
	pub name: String,
	pub bytes: Bytes,
}

/// Ordered sequence of `(name, bytes)` pairs a module is materialized from.
///
/// Later entries win when a name repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStream {
	entries: Vec<ResourceEntry>,
}

impl ResourceStream {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends one entry.
	#[must_use]
	pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
		self.push(name, bytes);
		self
	}

	pub fn push(&mut self, name: impl Into<String>, bytes: impl Into<Bytes>) {
		self.entries.push(ResourceEntry {
			name: name.into(),
			bytes: bytes.into(),
		});
	}

	pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Total payload size in bytes.
	pub fn byte_len(&self) -> usize {
		self.entries.iter().map(|e| e.bytes.len()).sum()
	}
}

impl<N: Into<String>, B: Into<Bytes>> FromIterator<(N, B)> for ResourceStream {
	fn from_iter<I: IntoIterator<Item = (N, B)>>(iter: I) -> Self {
		let mut stream = Self::new();
		for (name, bytes) in iter {
			stream.push(name, bytes);
		}
		stream
	}
}

/// Splits resource names into binary bundles and plain resources.
///
/// Patterns match against the last path component of the resource name.
#[derive(Debug, Clone)]
pub struct BundleClassifier {
	set: GlobSet,
	patterns: Vec<String>,
}

impl BundleClassifier {
	/// Compiles a classifier from glob patterns.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::InvalidPattern`] for the first pattern that fails to compile.
	pub fn new<I, S>(patterns: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut builder = GlobSetBuilder::new();
		let mut kept = Vec::new();
		for pattern in patterns {
			let pattern = pattern.as_ref();
			let glob = Glob::new(pattern).map_err(|error| ModuleError::InvalidPattern {
				pattern: pattern.to_string(),
				error,
			})?;
			builder.add(glob);
			kept.push(pattern.to_string());
		}
		let set = builder.build().map_err(|error| ModuleError::InvalidPattern {
			pattern: kept.join(","),
			error,
		})?;
		Ok(Self { set, patterns: kept })
	}

	/// Returns true when `name` denotes a binary bundle.
	pub fn is_bundle(&self, name: &str) -> bool {
		let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
		self.set.is_match(file_name)
	}

	pub fn patterns(&self) -> &[String] {
		&self.patterns
	}
}

impl Default for BundleClassifier {
	/// Classifier over [`DEFAULT_BUNDLE_PATTERNS`], which must always compile.
	fn default() -> Self {
		match Self::new(DEFAULT_BUNDLE_PATTERNS) {
			Ok(classifier) => classifier,
			Err(error) => {
				debug_assert!(false, "built-in bundle patterns must compile: {error}");
				warn!(%error, "built-in bundle patterns failed to compile, every resource stays inline");
				Self {
					set: GlobSet::empty(),
					patterns: Vec::new(),
				}
			}
		}
	}
}

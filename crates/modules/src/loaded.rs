//! Immutable module bundles and the builder that materializes them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{ModuleError, Result};
use crate::resource::{BundleClassifier, ResourceStream};
use crate::scope::ScopeId;
use crate::virtual_module::VirtualModule;

/// One resource held by a [`LoadedModule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
	/// Binary bundle written to the module's work directory.
	Bundle { path: PathBuf, len: u64 },
	/// Plain resource kept in memory.
	Inline(Bytes),
}

impl Resource {
	pub fn is_bundle(&self) -> bool {
		matches!(self, Self::Bundle { .. })
	}

	/// Reads the resource contents.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::Io`] if a bundle file can no longer be read, typically
	/// because its module was released.
	pub fn read(&self) -> Result<Bytes> {
		match self {
			Self::Inline(bytes) => Ok(bytes.clone()),
			Self::Bundle { path, .. } => std::fs::read(path).map(Bytes::from).map_err(|e| ModuleError::io(path, e)),
		}
	}
}

/// A resource resolved through the delegation chain.
///
/// Pins the module it was found in so bundle files outlive a concurrent swap.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
	module: Arc<LoadedModule>,
	name: String,
}

impl ResolvedResource {
	/// Scope that actually provided the resource.
	pub fn origin(&self) -> ScopeId {
		self.module.scope()
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn module(&self) -> &Arc<LoadedModule> {
		&self.module
	}

	/// Reads the resource contents.
	///
	/// # Errors
	///
	/// See [`Resource::read`].
	pub fn read(&self) -> Result<Bytes> {
		match self.module.resource(&self.name) {
			Some(resource) => resource.read(),
			None => Err(ModuleError::ResourceNotFound {
				name: self.name.clone(),
				scope: self.module.scope(),
			}),
		}
	}
}

/// Immutable bundle of resources backing one scope at a point in time.
///
/// Superseded, never mutated, on refresh. Readers that captured an older module keep
/// resolving against it until they drop it; the work directory is removed on
/// [`Self::release`] or when the last reference goes away.
#[derive(Debug)]
pub struct LoadedModule {
	scope: ScopeId,
	resources: BTreeMap<String, Resource>,
	parent: Option<Arc<VirtualModule>>,
	work_path: Option<PathBuf>,
	work_dir: Mutex<Option<TempDir>>,
	released: AtomicBool,
}

impl LoadedModule {
	/// Module with no resources, installed when a scope is first created.
	pub fn empty(scope: ScopeId, parent: Option<Arc<VirtualModule>>) -> Self {
		Self {
			scope,
			resources: BTreeMap::new(),
			parent,
			work_path: None,
			work_dir: Mutex::new(None),
			released: AtomicBool::new(false),
		}
	}

	/// Rebinds parent delegation of a module that has not been published yet.
	#[must_use]
	pub fn with_parent(mut self, parent: Option<Arc<VirtualModule>>) -> Self {
		self.parent = parent;
		self
	}

	pub fn scope(&self) -> ScopeId {
		self.scope
	}

	pub fn parent(&self) -> Option<&Arc<VirtualModule>> {
		self.parent.as_ref()
	}

	pub fn work_dir(&self) -> Option<&Path> {
		self.work_path.as_deref()
	}

	/// Local lookup, without delegation.
	pub fn resource(&self, name: &str) -> Option<&Resource> {
		self.resources.get(name)
	}

	pub fn resource_names(&self) -> impl Iterator<Item = &str> {
		self.resources.keys().map(String::as_str)
	}

	/// Paths of the materialized bundle files, ordered by resource name.
	pub fn bundles(&self) -> Vec<&Path> {
		self.resources
			.values()
			.filter_map(|r| match r {
				Resource::Bundle { path, .. } => Some(path.as_path()),
				Resource::Inline(_) => None,
			})
			.collect()
	}

	pub fn len(&self) -> usize {
		self.resources.len()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}

	pub fn is_released(&self) -> bool {
		self.released.load(Ordering::Acquire)
	}

	/// Resolves `name` locally, then through the parent chain.
	///
	/// Parents are consulted through their *current* module, so a refreshed parent is
	/// visible to children without rebuilding them.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::ResourceNotFound`] once the whole chain is exhausted, and
	/// [`ModuleError::Released`] when this module has already been released.
	pub fn lookup(self: &Arc<Self>, name: &str) -> Result<ResolvedResource> {
		if self.is_released() {
			return Err(ModuleError::Released { scope: self.scope });
		}
		if self.resources.contains_key(name) {
			return Ok(ResolvedResource {
				module: Arc::clone(self),
				name: name.to_string(),
			});
		}
		match &self.parent {
			Some(parent) => parent.find_resource(name).map_err(|err| match err {
				ModuleError::ResourceNotFound { name, .. } => ModuleError::ResourceNotFound { name, scope: self.scope },
				other => other,
			}),
			None => Err(ModuleError::ResourceNotFound {
				name: name.to_string(),
				scope: self.scope,
			}),
		}
	}

	/// Removes the work directory.
	///
	/// Idempotent. A failed cleanup is logged and not retried.
	pub fn release(&self) {
		if self.released.swap(true, Ordering::AcqRel) {
			return;
		}
		let Some(dir) = self.work_dir.lock().take() else {
			return;
		};
		let path = dir.path().to_path_buf();
		match dir.close() {
			Ok(()) => debug!(scope = %self.scope, path = %path.display(), "released module work directory"),
			Err(error) => warn!(scope = %self.scope, path = %path.display(), %error, "failed to remove module work directory"),
		}
	}
}

/// Materializes [`LoadedModule`]s from resource streams.
#[derive(Debug, Clone, Default)]
pub struct ModuleBuilder {
	classifier: BundleClassifier,
	work_root: Option<PathBuf>,
}

impl ModuleBuilder {
	pub fn new(classifier: BundleClassifier) -> Self {
		Self { classifier, work_root: None }
	}

	/// Creates work directories under `root` instead of the system temp dir.
	#[must_use]
	pub fn work_root(mut self, root: impl Into<PathBuf>) -> Self {
		self.work_root = Some(root.into());
		self
	}

	pub fn classifier(&self) -> &BundleClassifier {
		&self.classifier
	}

	/// Builds a module for `scope` delegating to `parent`.
	///
	/// Bundles are written into a fresh work directory; plain resources stay in memory.
	/// On error the partially written directory is removed.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::Io`] when the work directory cannot be created or written.
	pub fn build(&self, scope: ScopeId, parent: Option<Arc<VirtualModule>>, stream: &ResourceStream) -> Result<LoadedModule> {
		let dir = self.create_work_dir(scope)?;
		let bundle_dir = dir.path().join("bundles");
		let mut resources = BTreeMap::new();
		let mut bundle_count = 0usize;

		for (index, entry) in stream.iter().enumerate() {
			if !self.classifier.is_bundle(&entry.name) {
				resources.insert(entry.name.clone(), Resource::Inline(entry.bytes.clone()));
				continue;
			}
			if bundle_count == 0 {
				std::fs::create_dir_all(&bundle_dir).map_err(|e| ModuleError::io(&bundle_dir, e))?;
			}
			let path = bundle_dir.join(bundle_file_name(index, &entry.name));
			std::fs::write(&path, &entry.bytes).map_err(|e| ModuleError::io(&path, e))?;
			bundle_count += 1;
			resources.insert(
				entry.name.clone(),
				Resource::Bundle {
					path,
					len: entry.bytes.len() as u64,
				},
			);
		}

		debug!(
			%scope,
			resources = resources.len(),
			bundles = bundle_count,
			work_dir = %dir.path().display(),
			"materialized module"
		);

		Ok(LoadedModule {
			scope,
			resources,
			parent,
			work_path: Some(dir.path().to_path_buf()),
			work_dir: Mutex::new(Some(dir)),
			released: AtomicBool::new(false),
		})
	}

	fn create_work_dir(&self, scope: ScopeId) -> Result<TempDir> {
		let prefix = format!("stratum-{}-", scope.slug());
		let mut builder = tempfile::Builder::new();
		builder.prefix(&prefix);
		match &self.work_root {
			Some(root) => {
				std::fs::create_dir_all(root).map_err(|e| ModuleError::io(root, e))?;
				builder.tempdir_in(root).map_err(|e| ModuleError::io(root, e))
			}
			None => builder.tempdir().map_err(|e| ModuleError::io(std::env::temp_dir(), e)),
		}
	}
}

/// Flattens a resource name into a unique file name inside the bundle directory.
fn bundle_file_name(index: usize, name: &str) -> String {
	let base = name.rsplit(['/', '\\']).next().filter(|s| !s.is_empty() && *s != ".." && *s != ".").unwrap_or("bundle");
	format!("{index:04}-{base}")
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn stream() -> ResourceStream {
		ResourceStream::new()
			.with("lib/connector.jar", &b"PK-connector"[..])
			.with("process.bpmn", &b"<definitions/>"[..])
			.with("../../escape.jar", &b"PK-escape"[..])
	}

	#[test]
	fn build_splits_bundles_from_plain_resources() {
		let root = tempfile::tempdir().unwrap();
		let builder = ModuleBuilder::default().work_root(root.path());
		let module = builder.build(ScopeId::process(1), None, &stream()).unwrap();

		assert_eq!(module.len(), 3);
		assert!(module.resource("lib/connector.jar").unwrap().is_bundle());
		assert!(!module.resource("process.bpmn").unwrap().is_bundle());

		let work_dir = module.work_dir().unwrap().to_path_buf();
		assert!(work_dir.starts_with(root.path()));
		for bundle in module.bundles() {
			assert!(bundle.starts_with(&work_dir), "bundle escaped work dir: {}", bundle.display());
		}
		assert_eq!(module.resource("lib/connector.jar").unwrap().read().unwrap(), Bytes::from_static(b"PK-connector"));
	}

	#[test]
	fn release_removes_work_dir_and_blocks_lookup() {
		let module = Arc::new(ModuleBuilder::default().build(ScopeId::process(2), None, &stream()).unwrap());
		let work_dir = module.work_dir().unwrap().to_path_buf();
		assert!(work_dir.exists());

		module.release();
		module.release();

		assert!(!work_dir.exists());
		assert!(matches!(module.lookup("process.bpmn"), Err(ModuleError::Released { .. })));
	}

	#[test]
	fn lookup_without_parent_reports_not_found() {
		let module = Arc::new(LoadedModule::empty(ScopeId::GLOBAL, None));
		let err = module.lookup("missing.txt").unwrap_err();
		assert!(matches!(err, ModuleError::ResourceNotFound { ref name, scope } if name == "missing.txt" && scope == ScopeId::GLOBAL));
	}

	#[test]
	fn bundle_file_names_are_flattened() {
		assert_eq!(bundle_file_name(3, "a/b/c.jar"), "0003-c.jar");
		assert_eq!(bundle_file_name(0, "dir/"), "0000-bundle");
		assert_eq!(bundle_file_name(1, ".."), "0001-bundle");
	}
}

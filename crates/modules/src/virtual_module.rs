//! Stable, hot-swappable scope handles.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::listener::{ListenerId, ListenerSet, ScopeListener};
use crate::loaded::{LoadedModule, ResolvedResource};
use crate::scope::ScopeId;

/// Mutable indirection over an immutable [`LoadedModule`].
///
/// Callers keep an `Arc<VirtualModule>`; reads go through [`Self::current`], a wait-free
/// `ArcSwap` load. Swaps happen only through the registry, in commit order.
pub struct VirtualModule {
	scope: ScopeId,
	parent: Option<Arc<VirtualModule>>,
	current: ArcSwap<LoadedModule>,
	generation: AtomicU64,
	listeners: ListenerSet,
	/// Child scopes delegating here. Identities only; children own the edge.
	children: Mutex<BTreeSet<ScopeId>>,
}

impl VirtualModule {
	pub(crate) fn new(scope: ScopeId, parent: Option<Arc<VirtualModule>>) -> Self {
		let empty = LoadedModule::empty(scope, parent.clone());
		Self {
			scope,
			parent,
			current: ArcSwap::from_pointee(empty),
			generation: AtomicU64::new(0),
			listeners: ListenerSet::default(),
			children: Mutex::new(BTreeSet::new()),
		}
	}

	pub fn scope(&self) -> ScopeId {
		self.scope
	}

	pub fn parent(&self) -> Option<&Arc<VirtualModule>> {
		self.parent.as_ref()
	}

	/// Pins the module currently backing this scope.
	pub fn current(&self) -> Arc<LoadedModule> {
		self.current.load_full()
	}

	/// Number of swaps applied since creation.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	/// Child scopes currently delegating to this one.
	pub fn children(&self) -> Vec<ScopeId> {
		self.children.lock().iter().copied().collect()
	}

	pub fn has_children(&self) -> bool {
		!self.children.lock().is_empty()
	}

	/// Resolves a resource against the current module and then the parent chain.
	///
	/// # Errors
	///
	/// See [`LoadedModule::lookup`].
	pub fn find_resource(&self, name: &str) -> Result<ResolvedResource> {
		self.current().lookup(name)
	}

	pub(crate) fn listeners(&self) -> &ListenerSet {
		&self.listeners
	}

	pub(crate) fn add_listener(&self, listener: Arc<dyn ScopeListener>) -> ListenerId {
		self.listeners.insert(listener)
	}

	pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	/// Publishes `next` and returns the module it replaced.
	pub(crate) fn swap(&self, next: Arc<LoadedModule>) -> Arc<LoadedModule> {
		let previous = self.current.swap(next);
		self.generation.fetch_add(1, Ordering::AcqRel);
		previous
	}

	pub(crate) fn add_child(&self, child: ScopeId) {
		self.children.lock().insert(child);
	}

	pub(crate) fn remove_child(&self, child: ScopeId) {
		self.children.lock().remove(&child);
	}
}

impl fmt::Debug for VirtualModule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VirtualModule")
			.field("scope", &self.scope)
			.field("parent", &self.parent.as_ref().map(|p| p.scope))
			.field("generation", &self.generation())
			.field("listeners", &self.listeners.len())
			.finish_non_exhaustive()
	}
}

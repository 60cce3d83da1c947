//! Module registry: the isolation hierarchy of a node.
//!
//! # Purpose
//!
//! - Own every [`VirtualModule`] of the node, keyed by [`ScopeId`].
//! - Create scopes lazily, wiring parent delegation through [`ScopeId::parent`].
//! - Publish replacement [`LoadedModule`]s and fan refresh/destroy events out to listeners.
//! - Exclude transactional deferral and cluster replay; see `stratum_runtime::refresh`.
//!
//! # Mental model
//!
//! - Callers hold `Arc<VirtualModule>` handles. Handles are stable; their content is swapped.
//! - The registry map is consulted only to find or create a handle. Reading content never
//!   touches the registry lock.
//! - Creation and destruction of a scope are guarded by that scope's own entry lock; the
//!   map lock is only held to read, insert or remove one handle.
//! - Children are recorded on their parent as identities; a parent with children cannot
//!   be destroyed.
//!
//! # Invariants
//!
//! 1. Concurrent first access to a scope MUST yield exactly one [`VirtualModule`].
//!    - Enforced in: `ModuleRegistry::get_or_create` (double-checked under the entry lock)
//!    - Tested by: `registry::tests::concurrent_get_or_create_returns_one_instance`
//!    - Failure symptom: two handles for one scope; refreshes reach only one of them.
//!
//! 2. A scope with live children MUST NOT be destroyed.
//!    - Enforced in: `ModuleRegistry::destroy`
//!    - Tested by: `registry::tests::destroy_with_children_is_refused`
//!    - Failure symptom: child modules delegate into a released parent.
//!
//! 3. A published module MUST delegate to the parent handle its scope was created with.
//!    - Enforced in: `ModuleRegistry::swap`
//!    - Tested by: `registry::tests::swap_rejects_module_built_for_another_parent`
//!    - Failure symptom: a scope delegating into a parent that does not list it as a child,
//!      which can then be destroyed under it.
//!
//! 4. Update events MUST reach the refreshed scope and every transitive descendant, once each.
//!    - Enforced in: `ModuleRegistry::notify_updated`
//!    - Tested by: `registry::tests::refresh_notifies_descendants_once`
//!    - Failure symptom: caches keyed by child scopes serve content derived from the old parent.
//!
//! # Concurrency & ordering
//!
//! - Lookups take the map read lock. Creation and destruction take the write lock only
//!   for the insert or remove itself, so unrelated scopes never wait on each other.
//! - Creating a child holds the parent's entry lock, then its own. Destroying a scope holds
//!   its entry lock while checking children. Entry locks are always taken ancestor first.
//! - A child is attached only while its parent is still registered, so `destroy` observes
//!   a consistent child set.
//! - Listener callbacks run after all locks are released.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{ModuleError, Result};
use crate::listener::{ListenerId, ListenerSet, ScopeListener};
use crate::loaded::LoadedModule;
use crate::scope::{ScopeContext, ScopeId};
use crate::virtual_module::VirtualModule;

/// Per-scope guard serializing creation and destruction of one scope.
type EntryLock = Arc<Mutex<()>>;

/// Registry of the scopes hosted on one node.
#[derive(Default)]
pub struct ModuleRegistry {
	modules: RwLock<HashMap<ScopeId, Arc<VirtualModule>>>,
	entries: Mutex<HashMap<ScopeId, EntryLock>>,
	global_listeners: ListenerSet,
}

impl ModuleRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the handle for `scope` if it exists.
	pub fn get(&self, scope: ScopeId) -> Option<Arc<VirtualModule>> {
		self.modules.read().get(&scope).cloned()
	}

	/// Returns the handle for `scope`, creating it and any missing ancestors.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::MissingTenantContext`] when a process scope (or its chain)
	/// must be created without a tenant in `ctx`.
	pub fn get_or_create(&self, scope: ScopeId, ctx: &ScopeContext) -> Result<Arc<VirtualModule>> {
		loop {
			if let Some(module) = self.get(scope) {
				return Ok(module);
			}
			let parent = match scope.parent(ctx)? {
				Some(parent_scope) => Some(self.get_or_create(parent_scope, ctx)?),
				None => None,
			};

			let parent_entry = parent.as_ref().map(|p| self.entry(p.scope()));
			let _parent_guard = parent_entry.as_ref().map(|e| e.lock());
			if parent.as_ref().is_some_and(|p| !self.is_registered(p)) {
				debug!(%scope, "parent destroyed while creating scope, retrying");
				continue;
			}

			let entry = self.entry(scope);
			let _guard = entry.lock();
			if let Some(existing) = self.get(scope) {
				return Ok(existing);
			}
			let module = Arc::new(VirtualModule::new(scope, parent.clone()));
			if let Some(parent) = &parent {
				parent.add_child(scope);
			}
			self.modules.write().insert(scope, Arc::clone(&module));
			debug!(%scope, parent = ?parent.as_ref().map(|p| p.scope()), "created module scope");
			return Ok(module);
		}
	}

	/// Entry lock of `scope`, created on first use.
	fn entry(&self, scope: ScopeId) -> EntryLock {
		Arc::clone(self.entries.lock().entry(scope).or_default())
	}

	/// Drops the entry lock of a destroyed scope once nobody else holds it.
	fn prune_entry(&self, scope: ScopeId) {
		let mut entries = self.entries.lock();
		let idle = entries.get(&scope).is_some_and(|e| Arc::strong_count(e) == 1);
		if idle && !self.modules.read().contains_key(&scope) {
			entries.remove(&scope);
		}
	}

	fn is_registered(&self, module: &Arc<VirtualModule>) -> bool {
		self.modules.read().get(&module.scope()).is_some_and(|m| Arc::ptr_eq(m, module))
	}

	/// Child scopes of `scope`, empty when the scope does not exist.
	pub fn children(&self, scope: ScopeId) -> Vec<ScopeId> {
		self.get(scope).map(|m| m.children()).unwrap_or_default()
	}

	/// Transitive descendants of `scope`, breadth-first.
	pub fn descendants(&self, scope: ScopeId) -> Vec<ScopeId> {
		let modules = self.modules.read();
		let mut out = Vec::new();
		let mut queue: VecDeque<ScopeId> = modules.get(&scope).map(|m| m.children()).unwrap_or_default().into();
		while let Some(next) = queue.pop_front() {
			out.push(next);
			if let Some(module) = modules.get(&next) {
				queue.extend(module.children());
			}
		}
		out
	}

	/// Every registered scope, sorted.
	pub fn scopes(&self) -> Vec<ScopeId> {
		let mut scopes: Vec<ScopeId> = self.modules.read().keys().copied().collect();
		scopes.sort();
		scopes
	}

	pub fn len(&self) -> usize {
		self.modules.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.modules.read().is_empty()
	}

	/// Destroys `scope`: detaches it, releases its module and fires `on_destroy`.
	///
	/// Destroying an unknown scope is a no-op.
	///
	/// # Errors
	///
	/// Returns [`ModuleError::HasChildren`] while any child scope is registered; children
	/// must be destroyed first, depth-first (see [`Self::destroy_tree`]).
	pub fn destroy(&self, scope: ScopeId) -> Result<()> {
		let module = {
			let entry = self.entry(scope);
			let _guard = entry.lock();
			let Some(module) = self.get(scope) else {
				debug!(%scope, "destroy of unknown scope ignored");
				return Ok(());
			};
			let children = module.children();
			if !children.is_empty() {
				return Err(ModuleError::HasChildren { scope, children });
			}
			self.modules.write().remove(&scope);
			if let Some(parent) = module.parent() {
				parent.remove_child(scope);
			}
			module
		};
		self.prune_entry(scope);

		module.current().release();
		info!(%scope, "destroyed module scope");
		for listener in module.listeners().snapshot().into_iter().chain(self.global_listeners.snapshot()) {
			listener.on_destroy(scope);
		}
		Ok(())
	}

	/// Destroys `scope` and all of its descendants, children first.
	///
	/// # Errors
	///
	/// Propagates the first [`Self::destroy`] failure; scopes destroyed before it stay destroyed.
	pub fn destroy_tree(&self, scope: ScopeId) -> Result<()> {
		let mut order = self.descendants(scope);
		order.reverse();
		order.push(scope);
		for next in order {
			self.destroy(next)?;
		}
		Ok(())
	}

	/// Swaps the module backing `scope` without notifying listeners.
	///
	/// Returns the handle and the superseded module. Callers batching several swaps
	/// notify once with [`Self::notify_updated`].
	///
	/// # Errors
	///
	/// Returns [`ModuleError::ParentMismatch`] when `next` was built for another scope or
	/// delegates to a parent other than the handle's; otherwise see [`Self::get_or_create`].
	pub fn swap(&self, scope: ScopeId, ctx: &ScopeContext, next: Arc<LoadedModule>) -> Result<(Arc<VirtualModule>, Arc<LoadedModule>)> {
		let module = self.get_or_create(scope, ctx)?;
		let same_parent = match (module.parent(), next.parent()) {
			(None, None) => true,
			(Some(expected), Some(found)) => Arc::ptr_eq(expected, found),
			_ => false,
		};
		if next.scope() != scope || !same_parent {
			return Err(ModuleError::ParentMismatch {
				scope,
				expected: module.parent().map(|p| p.scope()),
				found: next.parent().map(|p| p.scope()),
			});
		}
		let previous = module.swap(next);
		debug!(%scope, generation = module.generation(), "swapped module");
		Ok((module, previous))
	}

	/// Swaps `scope` and notifies it and its descendants.
	///
	/// # Errors
	///
	/// See [`Self::get_or_create`].
	pub fn replace(&self, scope: ScopeId, ctx: &ScopeContext, next: LoadedModule) -> Result<Arc<VirtualModule>> {
		let (module, _previous) = self.swap(scope, ctx, Arc::new(next))?;
		self.notify_updated([scope]);
		Ok(module)
	}

	/// Fires `on_update` for each of `scopes` and all their descendants.
	///
	/// A scope reachable from several roots is notified once. Scope-local listeners run
	/// before global ones.
	pub fn notify_updated(&self, scopes: impl IntoIterator<Item = ScopeId>) {
		let mut seen = BTreeSet::new();
		let mut order = Vec::new();
		for scope in scopes {
			for next in std::iter::once(scope).chain(self.descendants(scope)) {
				if seen.insert(next) {
					order.push(next);
				}
			}
		}

		let globals = self.global_listeners.snapshot();
		for scope in order {
			let local = self.get(scope).map(|m| m.listeners().snapshot()).unwrap_or_default();
			for listener in local.iter().chain(globals.iter()) {
				listener.on_update(scope);
			}
		}
	}

	/// Registers a listener for events of `scope` only, creating the scope if needed.
	///
	/// # Errors
	///
	/// See [`Self::get_or_create`].
	pub fn add_listener(&self, scope: ScopeId, ctx: &ScopeContext, listener: Arc<dyn ScopeListener>) -> Result<ListenerId> {
		Ok(self.get_or_create(scope, ctx)?.add_listener(listener))
	}

	/// Removes a scope-local listener; returns false if it was not registered.
	pub fn remove_listener(&self, scope: ScopeId, id: ListenerId) -> bool {
		self.get(scope).is_some_and(|m| m.remove_listener(id))
	}

	/// Registers a listener for events of every scope.
	pub fn add_global_listener(&self, listener: Arc<dyn ScopeListener>) -> ListenerId {
		self.global_listeners.insert(listener)
	}

	pub fn remove_global_listener(&self, id: ListenerId) -> bool {
		self.global_listeners.remove(id)
	}
}

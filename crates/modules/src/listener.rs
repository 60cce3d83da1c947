//! Scope listeners and their registries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::scope::ScopeId;

/// Observer of module refresh and destroy events.
///
/// `on_update` is delivered for the refreshed scope and for every transitive
/// descendant, so caches keyed by scope can drop derived state even when the
/// descendant's own bundle did not change.
pub trait ScopeListener: Send + Sync {
	fn on_update(&self, scope: ScopeId);

	fn on_destroy(&self, scope: ScopeId);
}

/// Handle returned on registration, used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

/// Insertion-ordered listener collection.
#[derive(Default)]
pub(crate) struct ListenerSet {
	entries: RwLock<IndexMap<ListenerId, Arc<dyn ScopeListener>>>,
}

impl ListenerSet {
	pub fn insert(&self, listener: Arc<dyn ScopeListener>) -> ListenerId {
		let id = ListenerId::next();
		self.entries.write().insert(id, listener);
		id
	}

	pub fn remove(&self, id: ListenerId) -> bool {
		self.entries.write().shift_remove(&id).is_some()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Copies the current listeners so callbacks run without the lock held.
	pub fn snapshot(&self) -> Vec<Arc<dyn ScopeListener>> {
		self.entries.read().values().cloned().collect()
	}
}

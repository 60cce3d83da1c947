//! Transactional hot-swap of module scopes.
//!
//! # Purpose
//!
//! - Build replacement [`LoadedModule`]s from resource streams and publish them only when the
//!   enclosing [`Transaction`] commits.
//! - Replay committed refreshes on every other node and surface any peer that did not follow.
//! - Apply refreshes received from peers without re-broadcasting them.
//!
//! # Mental model
//!
//! - `refresh` builds eagerly and stages the result in a [`PendingRefresh`]. One pending
//!   refresh exists per (transaction, tenant); later refreshes of the same pair join it.
//! - Staged modules are detached from the registry: missing ancestor scopes are created and
//!   the parent is bound only when the module is published.
//! - The pending refresh is the transaction hook. On commit it swaps every staged scope,
//!   notifies once, then sends a single broadcast carrying every scope. On rollback it
//!   releases what it built.
//!
//! # Invariants
//!
//! 1. A staged module MUST NOT be visible before commit, nor ever after rollback.
//!    - Enforced in: `Shared::build_detached`, `PendingRefresh::after_commit`,
//!      `PendingRefresh::after_rollback`
//!    - Tested by: `refresh::tests::rollback_leaves_scope_untouched`
//!    - Failure symptom: other transactions read half-deployed content.
//!
//! 2. One committed transaction MUST produce one broadcast per tenant, whatever the number of
//!    scopes it refreshed.
//!    - Enforced in: `RefreshCoordinator::refresh` (coalescing by `PendingKey`)
//!    - Tested by: `refresh::tests::commit_coalesces_scopes_into_one_broadcast`
//!    - Failure symptom: N cluster round trips of up to the broadcast timeout each.
//!
//! 3. Peer failures MUST fail the commit and name the nodes.
//!    - Enforced in: `PendingRefresh::after_commit`
//!    - Tested by: `refresh::tests::peer_timeout_fails_commit_after_local_swap`
//!    - Failure symptom: a silently split cluster serving two module versions.
//!
//! # Concurrency & ordering
//!
//! - Swaps happen synchronously inside `after_commit`, before the broadcast await, so a
//!   scope's history follows commit order.
//! - The broadcast await is the only suspension point; the committing caller blocks for up
//!   to the configured timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use stratum_cluster::{ClusterBroadcaster, ClusterTask, RefreshBatch, ScopeRefresh};
use stratum_modules::{LoadedModule, ModuleBuilder, ModuleError, ModuleRegistry, ResourceStream, ScopeContext, ScopeId, TenantId, VirtualModule};
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError};
use crate::tx::{Transaction, TransactionId, TransactionSynchronization};

type PendingKey = (TransactionId, Option<TenantId>);

struct Shared {
	registry: Arc<ModuleRegistry>,
	builder: ModuleBuilder,
	broadcaster: Arc<dyn ClusterBroadcaster>,
	timeout: Duration,
	pending: Mutex<HashMap<PendingKey, Arc<PendingRefresh>>>,
}

impl Shared {
	/// Builds a module for `scope` without touching the registry.
	///
	/// The parent `ctx` resolves to must match the one of an already registered scope.
	fn build_detached(&self, scope: ScopeId, ctx: &ScopeContext, stream: &ResourceStream) -> Result<LoadedModule> {
		let parent = scope.parent(ctx)?;
		if let Some(existing) = self.registry.get(scope) {
			let registered = existing.parent().map(|p| p.scope());
			if registered != parent {
				return Err(ModuleError::ParentMismatch {
					scope,
					expected: registered,
					found: parent,
				}
				.into());
			}
		}
		Ok(self.builder.build(scope, None, stream)?)
	}

	/// Binds `module` to the parent handle of `scope`, creating missing scopes, and swaps it in.
	fn publish(&self, scope: ScopeId, ctx: &ScopeContext, module: LoadedModule) -> Result<Arc<VirtualModule>> {
		let parent = match scope.parent(ctx)? {
			Some(parent) => Some(self.registry.get_or_create(parent, ctx)?),
			None => None,
		};
		let (handle, _previous) = self.registry.swap(scope, ctx, Arc::new(module.with_parent(parent)))?;
		Ok(handle)
	}
}

/// Staged module for one scope, with the stream peers rebuild it from.
struct Staged {
	module: LoadedModule,
	resources: ResourceStream,
}

/// Refreshes staged by one transaction for one tenant.
struct PendingRefresh {
	key: PendingKey,
	shared: Arc<Shared>,
	staged: Mutex<IndexMap<ScopeId, Staged>>,
}

impl PendingRefresh {
	fn context(&self) -> ScopeContext {
		ScopeContext::from(self.key.1)
	}

	fn detach(&self) -> IndexMap<ScopeId, Staged> {
		self.shared.pending.lock().remove(&self.key);
		std::mem::take(&mut *self.staged.lock())
	}
}

#[async_trait]
impl TransactionSynchronization for PendingRefresh {
	async fn after_commit(&self) -> Result<()> {
		let staged = self.detach();
		if staged.is_empty() {
			return Ok(());
		}
		let ctx = self.context();
		let (tx, tenant) = self.key;

		let mut scopes = Vec::with_capacity(staged.len());
		let mut batch = RefreshBatch {
			tenant,
			scopes: Vec::with_capacity(staged.len()),
		};
		let mut staged = staged.into_iter();
		while let Some((scope, entry)) = staged.next() {
			let module = match self.shared.publish(scope, &ctx, entry.module) {
				Ok(module) => module,
				Err(error) => {
					staged.for_each(|(_, rest)| rest.module.release());
					self.shared.registry.notify_updated(scopes.iter().copied());
					warn!(%tx, %scope, %error, "could not publish refreshed module");
					return Err(error);
				}
			};
			debug!(%tx, %scope, generation = module.generation(), "published refreshed module");
			scopes.push(scope);
			batch.scopes.push(ScopeRefresh {
				scope,
				resources: entry.resources,
			});
		}
		self.shared.registry.notify_updated(scopes.iter().copied());
		info!(%tx, tenant = ?tenant.map(|t| t.0), scopes = scopes.len(), "committed module refresh");

		let target = tenant.map_or(ScopeId::GLOBAL, ScopeId::tenant);
		let report = self
			.shared
			.broadcaster
			.execute_on_others_and_wait(ClusterTask::RefreshScopes(batch), target, self.shared.timeout)
			.await;
		let failures = report.failures();
		if failures.is_empty() {
			debug!(%tx, peers = report.len(), "refresh acknowledged by peers");
			return Ok(());
		}
		warn!(%tx, %failures, "refresh not applied on every peer");
		Err(RuntimeError::Refresh { scopes, failures })
	}

	fn after_rollback(&self) {
		let staged = self.detach();
		for (scope, entry) in &staged {
			entry.module.release();
			debug!(tx = %self.key.0, %scope, "discarded staged module");
		}
	}
}

/// Transactional refresh entry point of a node.
#[derive(Clone)]
pub struct RefreshCoordinator {
	shared: Arc<Shared>,
}

impl RefreshCoordinator {
	/// Coordinator waiting up to `timeout` per peer for each committed refresh.
	pub fn new(registry: Arc<ModuleRegistry>, builder: ModuleBuilder, broadcaster: Arc<dyn ClusterBroadcaster>, timeout: Duration) -> Self {
		Self {
			shared: Arc::new(Shared {
				registry,
				builder,
				broadcaster,
				timeout,
				pending: Mutex::new(HashMap::new()),
			}),
		}
	}

	pub fn registry(&self) -> &Arc<ModuleRegistry> {
		&self.shared.registry
	}

	pub fn timeout(&self) -> Duration {
		self.shared.timeout
	}

	/// Builds a module for `scope` from `resources` and stages it on `tx`.
	///
	/// Nothing becomes visible until `tx` commits. Refreshing the same scope twice in one
	/// transaction keeps the latest build.
	///
	/// # Errors
	///
	/// Returns [`RuntimeError::Module`] for a missing tenant context, a scope registered under
	/// another parent or a failed build, and [`RuntimeError::TransactionCompleted`] when `tx`
	/// already completed.
	pub fn refresh(&self, tx: &Transaction, scope: ScopeId, ctx: &ScopeContext, resources: ResourceStream) -> Result<()> {
		let module = self.shared.build_detached(scope, ctx, &resources)?;
		let key = (tx.id(), ctx.tenant());

		let pending = match self.pending_for(tx, key) {
			Ok(pending) => pending,
			Err(error) => {
				module.release();
				return Err(error);
			}
		};

		let replaced = pending.staged.lock().insert(scope, Staged { module, resources });
		if let Some(replaced) = replaced {
			replaced.module.release();
		}
		debug!(tx = %tx.id(), %scope, "staged module refresh");
		Ok(())
	}

	/// Joins the pending refresh of `key`, or creates one and hooks it onto `tx`.
	fn pending_for(&self, tx: &Transaction, key: PendingKey) -> Result<Arc<PendingRefresh>> {
		let mut pending = self.shared.pending.lock();
		if let Some(existing) = pending.get(&key) {
			return Ok(Arc::clone(existing));
		}
		let created = Arc::new(PendingRefresh {
			key,
			shared: Arc::clone(&self.shared),
			staged: Mutex::new(IndexMap::new()),
		});
		tx.register(created.clone())?;
		pending.insert(key, Arc::clone(&created));
		debug!(tx = %tx.id(), tenant = ?key.1.map(|t| t.0), "opened pending refresh");
		Ok(created)
	}

	/// Rebuilds and swaps every scope of a batch received from a peer.
	///
	/// All scopes are built before any is swapped; listeners are notified once.
	///
	/// # Errors
	///
	/// Returns the first build or scope-resolution failure; nothing is swapped then.
	pub fn apply_remote(&self, batch: &RefreshBatch) -> Result<Vec<ScopeId>> {
		let ctx = batch.context();
		let mut built = Vec::with_capacity(batch.scopes.len());
		for entry in &batch.scopes {
			match self.shared.build_detached(entry.scope, &ctx, &entry.resources) {
				Ok(module) => built.push((entry.scope, module)),
				Err(error) => {
					for (_, module) in &built {
						module.release();
					}
					return Err(error);
				}
			}
		}

		let mut scopes = Vec::with_capacity(built.len());
		for (scope, module) in built {
			self.shared.publish(scope, &ctx, module)?;
			scopes.push(scope);
		}
		self.shared.registry.notify_updated(scopes.iter().copied());
		info!(tenant = ?batch.tenant.map(|t| t.0), scopes = scopes.len(), "applied refresh from peer");
		Ok(scopes)
	}

	/// Number of (transaction, tenant) pairs with staged refreshes.
	pub fn pending_count(&self) -> usize {
		self.shared.pending.lock().len()
	}
}

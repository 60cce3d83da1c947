//! Transaction boundary with post-completion hooks.
//!
//! Work that must only become visible once a transaction commits registers a
//! [`TransactionSynchronization`]. Hooks run in registration order after commit, or are told
//! about the rollback. Dropping an uncompleted [`Transaction`] rolls it back.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "tx-{}", self.0)
	}
}

/// Callback bound to the completion of one transaction.
#[async_trait]
pub trait TransactionSynchronization: Send + Sync {
	/// Runs once the transaction committed.
	async fn after_commit(&self) -> Result<()>;

	/// Runs when the transaction rolled back or was dropped uncompleted.
	fn after_rollback(&self);
}

/// Unit of work whose side effects are deferred to commit.
pub struct Transaction {
	id: TransactionId,
	synchronizations: Mutex<Option<Vec<Arc<dyn TransactionSynchronization>>>>,
}

impl Transaction {
	pub fn begin() -> Self {
		let id = TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed));
		debug!(tx = %id, "transaction started");
		Self {
			id,
			synchronizations: Mutex::new(Some(Vec::new())),
		}
	}

	pub fn id(&self) -> TransactionId {
		self.id
	}

	/// Registers a completion hook.
	///
	/// # Errors
	///
	/// Returns [`RuntimeError::TransactionCompleted`] once the transaction completed.
	pub fn register(&self, synchronization: Arc<dyn TransactionSynchronization>) -> Result<()> {
		match self.synchronizations.lock().as_mut() {
			Some(hooks) => {
				hooks.push(synchronization);
				Ok(())
			}
			None => Err(RuntimeError::TransactionCompleted(self.id)),
		}
	}

	/// Commits and runs every `after_commit` hook in registration order.
	///
	/// Every hook runs even if an earlier one fails.
	///
	/// # Errors
	///
	/// Returns the first hook error; later errors are logged.
	pub async fn commit(self) -> Result<()> {
		let hooks = self.take();
		debug!(tx = %self.id, hooks = hooks.len(), "committing transaction");
		let mut first_error = None;
		for hook in hooks {
			if let Err(error) = hook.after_commit().await {
				match first_error {
					None => first_error = Some(error),
					Some(_) => warn!(tx = %self.id, %error, "additional after-commit failure"),
				}
			}
		}
		first_error.map_or(Ok(()), Err)
	}

	/// Rolls back and notifies every hook.
	pub fn rollback(self) {
		self.rollback_hooks();
	}

	fn rollback_hooks(&self) {
		let hooks = self.take();
		if hooks.is_empty() {
			return;
		}
		debug!(tx = %self.id, hooks = hooks.len(), "rolling back transaction");
		for hook in hooks {
			hook.after_rollback();
		}
	}

	fn take(&self) -> Vec<Arc<dyn TransactionSynchronization>> {
		self.synchronizations.lock().take().unwrap_or_default()
	}
}

impl Drop for Transaction {
	fn drop(&mut self) {
		self.rollback_hooks();
	}
}

impl fmt::Debug for Transaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Transaction").field("id", &self.id).finish_non_exhaustive()
	}
}

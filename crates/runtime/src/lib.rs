//! Node runtime for stratum.
//!
//! Wires the module registry, transactional refreshes and tenant runtimes of one node, and
//! executes the cluster tasks other nodes send it.
//!
//! ```text
//! deployer ─► RefreshCoordinator::refresh ─► Transaction::commit
//!                                              ├─► ModuleRegistry swap + notify
//!                                              └─► ClusterBroadcaster ─► peer Node::handle_task
//!                                                                       └─► RefreshCoordinator::apply_remote
//! ```

mod config;
mod error;
mod module_service;
mod node;
mod refresh;
mod tx;

pub use config::{ConfigError, NodeSection, RefreshSection, RuntimeConfig, TenantSection};
pub use error::{Result, RuntimeError};
pub use module_service::TenantModuleService;
pub use node::Node;
pub use refresh::RefreshCoordinator;
pub use tx::{Transaction, TransactionId, TransactionSynchronization};

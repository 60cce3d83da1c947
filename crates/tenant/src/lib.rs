//! Tenant lifecycle.
//!
//! [`TenantRuntime`] moves one tenant between ACTIVATED, PAUSED and DEACTIVATED, sequencing
//! its scheduler jobs, sessions and [`LifecycleService`]s, broadcasting services-state changes
//! to peers and recovering in-flight work once per activation through
//! [`TenantElementsRestarter`].

mod collaborators;
mod error;
pub mod memory;
mod record;
mod restart;
mod runtime;
mod services;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collaborators::{CollaboratorError, PersistenceCollaborator, SchedulerCollaborator, SessionCollaborator};
pub use error::{LifecycleError, Result, ServiceAction, Transition};
pub use record::{TenantRecord, TenantStatus, TenantUpdate};
pub use restart::{PlatformContext, RestartGate, TenantContext, TenantElementsRestarter, TenantRestartHandler};
pub use runtime::{TenantCollaborators, TenantRuntime, TenantRuntimeBuilder};
pub use services::{LifecycleService, TenantServices};

//! Runtime module isolation.
//!
//! A node hosts a three-level hierarchy of isolated scopes (global, tenant, process).
//! Each scope is a [`VirtualModule`]: a stable handle whose backing [`LoadedModule`] can
//! be replaced atomically while readers of the previous module finish undisturbed.
//!
//! ```text
//! global ◄── tenant:1 ◄── process:10
//!        ◄── tenant:2 ◄── process:11
//!                     ◄── process:12
//! ```
//!
//! Resource lookups delegate from child to parent through the parent's *current* module.
//! The [`ModuleRegistry`] owns the hierarchy, refuses to destroy scopes with children
//! and fans update/destroy events out to [`ScopeListener`]s.

mod error;
mod listener;
mod loaded;
mod registry;
mod resource;
mod scope;
mod virtual_module;

pub use error::{ModuleError, Result};
pub use listener::{ListenerId, ScopeListener};
pub use loaded::{LoadedModule, ModuleBuilder, ResolvedResource, Resource};
pub use registry::ModuleRegistry;
pub use resource::{BundleClassifier, DEFAULT_BUNDLE_PATTERNS, ResourceEntry, ResourceStream};
pub use scope::{ScopeContext, ScopeId, ScopeKind, TenantId};
pub use virtual_module::VirtualModule;

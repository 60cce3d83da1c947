//! Cluster broadcast for stratum nodes.
//!
//! A [`ClusterBroadcaster`] runs a serializable [`ClusterTask`] on every other node and
//! collects one outcome per peer into a [`BroadcastReport`]. Peers execute tasks through
//! their [`ClusterTaskHandler`].

mod broadcaster;
mod local;
mod report;
mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broadcaster::{ClusterBroadcaster, ClusterTaskHandler, DEFAULT_BROADCAST_TIMEOUT, SoloBroadcaster};
pub use local::{LocalBroadcaster, LocalCluster};
pub use report::{BroadcastReport, NodeFailure, NodeFailures};
pub use task::{ClusterTask, NodeId, RefreshBatch, ScopeRefresh, ServicesState};

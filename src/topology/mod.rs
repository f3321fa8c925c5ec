//! Topology Subsystem
//!
//! Cluster membership and key ownership as seen by the write path:
//! - Addresses of cluster members
//! - Immutable, monotonically versioned topology snapshots
//! - The provider interface (current snapshot, wait-for-id, membership
//!   notifications) and its in-process implementation
//! - The ownership splitter for single-key and batch writes

mod address;
mod provider;
mod snapshot;
mod splitter;

pub use address::Address;
pub use provider::{MembershipListener, TopologyManager, TopologyProvider};
pub use snapshot::{Segment, Topology};
pub use splitter::{group_by_backup, owners_of, split_batch, BatchSplit, PrimaryShare};

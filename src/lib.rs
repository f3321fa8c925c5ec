//! aerocache - triangle write replication for a distributed in-memory cache
//!
//! A write travels originator → primary owner → backup owners, and both
//! primary and backups acknowledge straight to the originator. The
//! originator's collector completes the write once the primary and every
//! backup still in the topology have answered; topology changes turn into
//! retries of the same invocation.
//!
//! Layout:
//! - [`topology`], [`command`], [`store`], [`transport`]: shapes and
//!   collaborator interfaces
//! - [`collector`]: acknowledgment tracking on the originator
//! - [`triangle`]: dispatcher, primary executor, backup applier and retry
//!   supervisor
//! - [`node`], [`cache`]: one cluster member and its cache API
//! - [`simulation`]: in-process clusters for tests and the CLI

pub mod cache;
pub mod cli;
pub mod collector;
pub mod command;
pub mod config;
pub mod errors;
pub mod node;
pub mod observability;
pub mod simulation;
pub mod store;
pub mod topology;
pub mod transport;
pub mod triangle;

pub use cache::ReplicatedCache;
pub use config::ReplicationConfig;
pub use errors::{CacheError, CacheResult, OUTDATED_TOPOLOGY};
pub use node::CacheNode;
pub use simulation::LocalCluster;

//! Ack Collector
//!
//! Tracks, per in-flight write, which owners still have to acknowledge
//! before the caller gets its result.
//!
//! # Lifecycle
//!
//! ```text
//! create ──► COLLECTING ──► COMPLETED(ok)
//!                 │
//!                 └───────► COMPLETED(err)
//! ```
//!
//! - Registration is first-writer-wins per `CommandInvocationId`
//! - Acknowledgments tagged with another topology id are dropped
//! - A departed primary fails the operation with the topology-retry signal
//! - A departed backup's acknowledgment is waived
//! - The awaiting caller removes the collector on completion or timeout;
//!   late acknowledgments then find nothing and are dropped

mod registry;
mod state;

pub use registry::CommandAckCollector;
pub use state::{AckOutcome, Collector, MembershipOutcome};

//! Error types for the replicated write path
//!
//! Errors fall in three classes:
//! - Topology-retry signals (`OutdatedTopology`, `PeerUnreachable`): expected,
//!   recovered by the retry supervisor, never surfaced unless the topology
//!   fails to converge
//! - Timeouts waiting for acknowledgments: surfaced, never retried here
//! - Execution faults: surfaced unchanged
//!
//! A conditional mismatch is not an error; it is a `success=false` result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandInvocationId;
use crate::topology::Address;

/// Result type for cache write operations
pub type CacheResult<T> = Result<T, CacheError>;

/// The topology-retry signal.
///
/// A unit variant: building it allocates nothing and captures no backtrace,
/// so it can be raised on every topology change without cost.
pub const OUTDATED_TOPOLOGY: CacheError = CacheError::OutdatedTopology;

/// Errors raised by the write path
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CacheError {
    /// The command was stamped with a topology that is no longer current,
    /// or its primary owner left before deciding.
    #[error("Topology changed during the operation, retry required")]
    OutdatedTopology,

    /// The target node is suspected or unreachable
    #[error("Peer {0} is suspected or unreachable")]
    PeerUnreachable(Address),

    /// Acknowledgments did not arrive in time
    #[error("Timed out after {timeout_ms}ms waiting for acknowledgments of {id}")]
    Timeout {
        /// Operation that timed out
        id: CommandInvocationId,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The topology did not reach the required id in time
    #[error("Timed out waiting for topology {0}")]
    TopologyTimeout(u64),

    /// The key has no owners in the current topology
    #[error("No owners for key in topology {0}")]
    NoOwners(u64),

    /// Local storage engine fault
    #[error("Storage error: {0}")]
    Storage(String),

    /// Fault raised while executing on another node
    #[error("Remote error on {node}: {message}")]
    Remote {
        /// Node that raised the fault
        node: Address,
        /// Description of the fault
        message: String,
    },

    /// Message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Returns the shared topology-retry signal
    pub fn outdated_topology() -> Self {
        OUTDATED_TOPOLOGY
    }

    /// Whether this error should trigger a retry after topology convergence
    pub fn is_topology_retry(&self) -> bool {
        matches!(
            self,
            CacheError::OutdatedTopology | CacheError::PeerUnreachable(_)
        )
    }

    /// Whether this error is a timeout of any kind
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CacheError::Timeout { .. } | CacheError::TopologyTimeout(_)
        )
    }

    /// Short, stable code used in log lines
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::OutdatedTopology => "OUTDATED_TOPOLOGY",
            CacheError::PeerUnreachable(_) => "PEER_UNREACHABLE",
            CacheError::Timeout { .. } => "ACK_TIMEOUT",
            CacheError::TopologyTimeout(_) => "TOPOLOGY_TIMEOUT",
            CacheError::NoOwners(_) => "NO_OWNERS",
            CacheError::Storage(_) => "STORAGE",
            CacheError::Remote { .. } => "REMOTE",
            CacheError::Codec(_) => "CODEC",
            CacheError::Config(_) => "CONFIG",
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

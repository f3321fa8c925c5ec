//! Messages exchanged on the write path
//!
//! ```text
//! originator ──Dispatch──▶ primary ──Backup──▶ backup
//!      ▲                      │                  │
//!      └──────PrimaryAck──────┘                  │
//!      └──────────────────BackupAck──────────────┘
//! ```
//!
//! Any node may answer the originator with an `ExceptionAck` instead.
//! Every message carries the invocation id and the topology id of the
//! attempt it belongs to.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::invocation::CommandInvocationId;
use super::write::{Key, Metadata, Value, WriteCommand};
use crate::errors::{CacheError, CacheResult};
use crate::topology::Segment;

/// Already-decided change a backup applies without checking conditions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupOp {
    /// Store the value
    Write { value: Value, metadata: Metadata },
    /// Remove the entry
    Remove,
}

/// One key of a forwarded write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Key
    pub key: Key,
    /// Change decided by the primary
    pub op: BackupOp,
}

/// Write forwarded from a primary to one backup owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupWrite {
    /// Invocation id of the originating write
    pub id: CommandInvocationId,
    /// Topology id the primary decided under
    pub topology_id: u64,
    /// Changes to apply, in primary order
    pub entries: Vec<BackupEntry>,
    /// Segments covered, present only for batch writes
    pub segments: Option<BTreeSet<Segment>>,
    /// Whether the backup must acknowledge to the originator
    pub ack_required: bool,
}

/// Outcome a primary reports to the originator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryOutcome {
    /// Single-key write: previous value and whether the write applied
    Single { value: Option<Value>, success: bool },
    /// Batch write: segments decided and previous values of their keys
    Batch {
        segments: BTreeSet<Segment>,
        previous: Vec<(Key, Value)>,
    },
}

/// Primary acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryAck {
    /// Invocation id
    pub id: CommandInvocationId,
    /// Topology id of the attempt
    pub topology_id: u64,
    /// Outcome
    pub outcome: PrimaryOutcome,
}

/// Backup acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupAck {
    /// Invocation id
    pub id: CommandInvocationId,
    /// Topology id of the attempt
    pub topology_id: u64,
    /// Segments applied, present only for batch writes
    pub segments: Option<BTreeSet<Segment>>,
}

/// Failure reported to the originator.
///
/// Carrying [`CacheError::OutdatedTopology`] is the "unsure" reply of a
/// node whose topology moved past the command's stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionAck {
    /// Invocation id
    pub id: CommandInvocationId,
    /// Topology id of the attempt
    pub topology_id: u64,
    /// The failure
    pub error: CacheError,
}

/// Every message of the write path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Originator → primary
    Dispatch(WriteCommand),
    /// Primary → backup
    Backup(BackupWrite),
    /// Primary → originator
    PrimaryAck(PrimaryAck),
    /// Backup → originator
    BackupAck(BackupAck),
    /// Any node → originator
    ExceptionAck(ExceptionAck),
}

impl Message {
    /// Short name used in logs and delivery records
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Dispatch(_) => "dispatch",
            Message::Backup(_) => "backup",
            Message::PrimaryAck(_) => "primary_ack",
            Message::BackupAck(_) => "backup_ack",
            Message::ExceptionAck(_) => "exception_ack",
        }
    }

    /// Invocation id the message belongs to
    pub fn invocation_id(&self) -> &CommandInvocationId {
        match self {
            Message::Dispatch(command) => command.id(),
            Message::Backup(write) => &write.id,
            Message::PrimaryAck(ack) => &ack.id,
            Message::BackupAck(ack) => &ack.id,
            Message::ExceptionAck(ack) => &ack.id,
        }
    }

    /// Encode for the wire
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

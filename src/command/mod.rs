//! Command Subsystem
//!
//! Shapes of everything the write path moves around:
//! - Invocation ids correlating a write with its acknowledgments
//! - Write commands and their retry relaxation
//! - Value matchers evaluated by the primary owner
//! - Messages between originator, primary and backups

mod invocation;
mod matcher;
mod message;
mod write;

pub use invocation::{CommandInvocationId, InvocationIdGenerator};
pub use matcher::ValueMatcher;
pub use message::{
    BackupAck, BackupEntry, BackupOp, BackupWrite, ExceptionAck, Message, PrimaryAck,
    PrimaryOutcome,
};
pub use write::{
    BatchEntry, CommandFlags, Durability, Key, Metadata, ReturnValue, Value, WriteCommand,
    WriteKind,
};

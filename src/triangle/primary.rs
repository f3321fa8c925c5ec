//! Primary Executor
//!
//! Runs on the primary owner of a key. Decides the write against local
//! storage and, when it took effect, forwards the decided change to every
//! backup with per-sender FIFO ordering. Apply and forward happen under the
//! key's stripe lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::context::NodeContext;
use crate::command::{
    BackupEntry, BackupOp, BackupWrite, BatchEntry, ExceptionAck, Key, Message, PrimaryAck,
    PrimaryOutcome, Value, ValueMatcher, WriteCommand, WriteKind,
};
use crate::errors::{CacheError, CacheResult};
use crate::observability::{log_event, Event};
use crate::store::Applied;
use crate::topology::{group_by_backup, owners_of, Address, Segment, Topology};
use crate::transport::DeliveryOrder;

/// Outcome of one primary's share of a batch
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchApplied {
    /// Segments this primary decided
    pub segments: BTreeSet<Segment>,
    /// Previous values of the entries that had one
    pub previous: Vec<(Key, Value)>,
}

/// Executes writes as primary owner
#[derive(Debug)]
pub struct PrimaryExecutor {
    ctx: Arc<NodeContext>,
}

impl PrimaryExecutor {
    /// Create an executor over the node's collaborators
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Execute a single-key write.
    ///
    /// `owners` is the owner list captured at dispatch, primary first.
    /// `before_forward` runs after a successful apply and before any
    /// backup is contacted, still under the key lock; the originator uses
    /// it to register its collector so no backup ack can arrive first.
    pub fn execute<F>(
        &self,
        command: &WriteCommand,
        owners: &[Address],
        before_forward: F,
    ) -> CacheResult<Applied>
    where
        F: FnOnce(&Applied),
    {
        let key = command
            .kind()
            .key()
            .ok_or_else(|| CacheError::Storage("batch command on single-key path".to_string()))?;
        let id = command.id().to_string();

        let _guard = self.ctx.locks.lock(key);
        let applied = match self.ctx.storage.apply_write(command.kind()) {
            Ok(applied) => applied,
            Err(err) => {
                log_event(
                    Event::PrimaryFault,
                    &[("error", &err.to_string()), ("id", &id)],
                );
                return Err(err);
            }
        };

        // A retried removal finding no entry still reaches backups that
        // missed the first attempt
        let applied = match command.kind() {
            WriteKind::Remove {
                matcher: ValueMatcher::Always,
                ..
            } if command.is_retry() && applied.previous.is_none() => {
                Applied::success(None, BackupOp::Remove)
            }
            _ => applied,
        };

        let Some(op) = applied.backup.clone() else {
            self.ctx.metrics.increment_conditional_mismatches();
            log_event(
                Event::PrimaryConditionFailed,
                &[("command", command.kind().name()), ("id", &id)],
            );
            return Ok(applied);
        };
        log_event(
            Event::PrimaryApplied,
            &[("command", command.kind().name()), ("id", &id)],
        );

        before_forward(&applied);

        let entry = BackupEntry {
            key: key.clone(),
            op,
        };
        for backup in owners.iter().skip(1).filter(|b| !self.ctx.is_local(b)) {
            self.forward(command, backup, vec![entry.clone()], None);
        }
        Ok(applied)
    }

    /// Execute this node's share of a batch.
    ///
    /// Every entry is written unconditionally. Backups receive only the
    /// entries of the segments they own, tagged with those segments.
    pub fn execute_batch<F>(
        &self,
        command: &WriteCommand,
        entries: Vec<BatchEntry>,
        topology: &Topology,
        before_forward: F,
    ) -> CacheResult<BatchApplied>
    where
        F: FnOnce(&BatchApplied),
    {
        let id = command.id().to_string();
        let _guards = self
            .ctx
            .locks
            .lock_all(entries.iter().map(|entry| entry.key.as_slice()));

        let mut applied = BatchApplied::default();
        let mut forwarded = Vec::with_capacity(entries.len());
        for entry in entries {
            applied.segments.insert(topology.segment_of(&entry.key));
            let write = WriteKind::put(entry.key.clone(), entry.value.clone())
                .with_metadata(entry.metadata.clone());

            let outcome = match self.ctx.storage.apply_write(&write) {
                Ok(outcome) => outcome,
                Err(err) => {
                    log_event(
                        Event::PrimaryFault,
                        &[("error", &err.to_string()), ("id", &id)],
                    );
                    return Err(err);
                }
            };
            if let Some(previous) = outcome.previous {
                applied.previous.push((entry.key.clone(), previous));
            }
            forwarded.push(BackupEntry {
                key: entry.key,
                op: BackupOp::Write {
                    value: entry.value,
                    metadata: entry.metadata,
                },
            });
        }
        log_event(
            Event::PrimaryApplied,
            &[
                ("command", command.kind().name()),
                ("entries", &forwarded.len().to_string()),
                ("id", &id),
            ],
        );

        before_forward(&applied);

        let by_backup = group_by_backup(topology, &forwarded, |entry| entry.key.as_slice());
        for (backup, (entries, segments)) in by_backup {
            if self.ctx.is_local(&backup) {
                continue;
            }
            self.forward(command, &backup, entries, Some(segments));
        }
        Ok(applied)
    }

    /// Handle a write dispatched by a remote originator.
    ///
    /// A node ahead of the command's topology replies "unsure" and a node
    /// behind it first waits for the topology to catch up. The primary
    /// acknowledgment goes out after the backups were forwarded to.
    pub async fn handle_dispatch(&self, command: WriteCommand) {
        let origin = command.id().origin().clone();
        let ack_required = command.ack_required();
        let mut topology = self.ctx.topology.current_topology();

        if topology.id() < command.topology_id() {
            log_event(
                Event::PrimaryAwaitTopology,
                &[
                    ("current", &topology.id().to_string()),
                    ("id", &command.id().to_string()),
                    ("topology_id", &command.topology_id().to_string()),
                ],
            );
            match self
                .ctx
                .topology
                .wait_for_topology(command.topology_id(), self.ctx.remote_timeout)
                .await
            {
                Ok(reached) => topology = reached,
                Err(err) => {
                    self.fail(&origin, &command, err);
                    return;
                }
            }
        }
        if topology.id() > command.topology_id() {
            if ack_required {
                let unsure = self.ctx.unsure(command.id().clone(), command.topology_id());
                self.ctx.send_exception(&origin, unsure);
            }
            return;
        }

        let outcome = match command.kind() {
            WriteKind::PutAll { entries } => {
                let owns_all = entries
                    .iter()
                    .all(|entry| topology.primary(&entry.key) == Some(&self.ctx.address));
                if !owns_all {
                    self.fail(&origin, &command, CacheError::outdated_topology());
                    return;
                }
                self.execute_batch(&command, entries.clone(), &topology, |_| {})
                    .map(|applied| PrimaryOutcome::Batch {
                        segments: applied.segments,
                        previous: applied.previous,
                    })
            }
            kind => {
                let owners = kind
                    .key()
                    .map(|key| owners_of(&topology, key))
                    .unwrap_or_default();
                if owners.first() != Some(&self.ctx.address) {
                    self.fail(&origin, &command, CacheError::outdated_topology());
                    return;
                }
                self.execute(&command, &owners, |_| {})
                    .map(|applied| PrimaryOutcome::Single {
                        value: applied.previous,
                        success: applied.success,
                    })
            }
        };

        match outcome {
            Ok(outcome) if ack_required => self.ctx.send_ack(
                &origin,
                Message::PrimaryAck(PrimaryAck {
                    id: command.id().clone(),
                    topology_id: command.topology_id(),
                    outcome,
                }),
            ),
            Ok(_) => {}
            Err(err) => self.fail(&origin, &command, err),
        }
    }

    fn fail(&self, origin: &Address, command: &WriteCommand, error: CacheError) {
        if !command.ack_required() {
            return;
        }
        self.ctx.send_exception(
            origin,
            ExceptionAck {
                id: command.id().clone(),
                topology_id: command.topology_id(),
                error,
            },
        );
    }

    fn forward(
        &self,
        command: &WriteCommand,
        backup: &Address,
        entries: Vec<BackupEntry>,
        segments: Option<BTreeSet<Segment>>,
    ) {
        let message = Message::Backup(BackupWrite {
            id: command.id().clone(),
            topology_id: command.topology_id(),
            entries,
            segments,
            ack_required: command.ack_required(),
        });

        match self
            .ctx
            .transport
            .send_to(backup, message, DeliveryOrder::PerSenderFifo)
        {
            Ok(()) => {
                self.ctx.metrics.increment_backups_forwarded();
                log_event(
                    Event::BackupForward,
                    &[("backup", backup.as_str()), ("id", &command.id().to_string())],
                );
            }
            // The collector waives this backup once it leaves the view
            Err(err) => log_event(
                Event::BackupForwardFailed,
                &[
                    ("backup", backup.as_str()),
                    ("error", &err.to_string()),
                    ("id", &command.id().to_string()),
                ],
            ),
        }
    }
}

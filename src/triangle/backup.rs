//! Backup Applier
//!
//! Applies changes a primary already decided. Nothing is re-checked: the
//! primary's decision and the per-sender FIFO order of its forwards are
//! what keep backups consistent with it.

use std::sync::Arc;

use super::context::NodeContext;
use crate::command::{BackupAck, BackupWrite, ExceptionAck, Message};
use crate::observability::{log_event, Event};

/// Applies forwarded writes on a backup owner
#[derive(Debug)]
pub struct BackupApplier {
    ctx: Arc<NodeContext>,
}

impl BackupApplier {
    /// Create an applier over the node's collaborators
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Apply one forwarded write and acknowledge it to the originator.
    pub fn apply(&self, write: BackupWrite) {
        let origin = write.id.origin().clone();
        let current = self.ctx.topology.current_topology().id();

        if current > write.topology_id {
            if write.ack_required {
                let unsure = self.ctx.unsure(write.id, write.topology_id);
                self.ctx.send_exception(&origin, unsure);
            }
            return;
        }

        for entry in &write.entries {
            if let Err(err) = self.ctx.storage.apply_backup_write(&entry.key, &entry.op) {
                log_event(
                    Event::BackupFault,
                    &[("error", &err.to_string()), ("id", &write.id.to_string())],
                );
                if write.ack_required {
                    self.ctx.send_exception(
                        &origin,
                        ExceptionAck {
                            id: write.id,
                            topology_id: write.topology_id,
                            error: err,
                        },
                    );
                }
                return;
            }
        }
        self.ctx.metrics.increment_backups_applied();
        log_event(
            Event::BackupApplied,
            &[
                ("entries", &write.entries.len().to_string()),
                ("id", &write.id.to_string()),
            ],
        );

        if !write.ack_required {
            return;
        }
        if self.ctx.is_local(&origin) {
            let from = &self.ctx.address;
            match &write.segments {
                Some(segments) => self
                    .ctx
                    .collectors
                    .batch_backup_ack(&write.id, from, segments, write.topology_id),
                None => self.ctx.collectors.backup_ack(&write.id, from, write.topology_id),
            };
            return;
        }
        self.ctx.send_ack(
            &origin,
            Message::BackupAck(BackupAck {
                id: write.id,
                topology_id: write.topology_id,
                segments: write.segments,
            }),
        );
    }
}

//! Write Dispatcher
//!
//! Runs on the originating node, once per attempt. Stamps the command with
//! the current topology, executes it in-process when this node is the
//! primary and otherwise sends it to the primary, then waits on the
//! operation's collector.

use std::sync::Arc;

use super::context::NodeContext;
use super::primary::PrimaryExecutor;
use crate::command::{
    BatchEntry, CommandInvocationId, Message, ReturnValue, WriteCommand, WriteKind,
};
use crate::errors::{CacheError, CacheResult};
use crate::observability::{log_event, Event};
use crate::topology::{owners_of, split_batch, Topology};
use crate::transport::DeliveryOrder;

/// Originator side of the write path
#[derive(Debug)]
pub struct WriteDispatcher {
    ctx: Arc<NodeContext>,
    primary: Arc<PrimaryExecutor>,
}

impl WriteDispatcher {
    /// Create a dispatcher sharing the node's primary executor
    pub fn new(ctx: Arc<NodeContext>, primary: Arc<PrimaryExecutor>) -> Self {
        Self { ctx, primary }
    }

    /// Run one attempt of `command` against the current topology.
    ///
    /// Sends at most one message per primary. Topology-retry errors are
    /// returned as-is for the retry supervisor to act on.
    pub async fn attempt(&self, command: &mut WriteCommand) -> CacheResult<ReturnValue> {
        let topology = self.ctx.topology.current_topology();
        command.set_topology_id(topology.id());

        self.ctx.metrics.increment_writes_dispatched();
        log_event(
            Event::WriteDispatch,
            &[
                ("command", command.kind().name()),
                ("id", &command.id().to_string()),
                ("retry", if command.is_retry() { "true" } else { "false" }),
                ("topology_id", &topology.id().to_string()),
            ],
        );

        let result = match command.kind() {
            WriteKind::PutAll { entries } => {
                let entries = entries.clone();
                self.dispatch_batch(command, entries, &topology).await
            }
            _ => self.dispatch_single(command, &topology).await,
        }?;

        if command.flags().ignore_return_values {
            return Ok(ReturnValue::empty_for(command.kind()));
        }
        Ok(result)
    }

    async fn dispatch_single(
        &self,
        command: &WriteCommand,
        topology: &Topology,
    ) -> CacheResult<ReturnValue> {
        let ctx = &self.ctx;
        let owners = command
            .kind()
            .key()
            .map(|key| owners_of(topology, key))
            .unwrap_or_default();
        let Some(primary) = owners.first().cloned() else {
            return Err(CacheError::NoOwners(topology.id()));
        };
        let id = command.id().clone();
        let collect = command.ack_required();

        if ctx.is_local(&primary) {
            ctx.metrics.increment_local_primary();
            let applied = self.primary.execute(command, &owners, |applied| {
                if collect {
                    ctx.collectors.create_with_result(
                        id.clone(),
                        primary.clone(),
                        applied.previous.clone(),
                        &owners[1..],
                        topology.id(),
                    );
                }
            })?;
            if collect {
                self.catch_up(&id, topology);
            }

            let fallback = ReturnValue::Single(applied.previous);
            if !applied.success || !collect {
                return Ok(fallback);
            }
            return ctx
                .collectors
                .await_completion(&id, ctx.remote_timeout, fallback)
                .await;
        }

        ctx.metrics.increment_remote_primary();
        if collect {
            ctx.collectors.create(id.clone(), &owners, topology.id())?;
            self.catch_up(&id, topology);
        }
        if let Err(err) = ctx.transport.send_to(
            &primary,
            Message::Dispatch(command.clone()),
            DeliveryOrder::Unordered,
        ) {
            ctx.collectors.dispose(&id);
            return Err(err);
        }

        let fallback = ReturnValue::Single(None);
        if !collect {
            return Ok(fallback);
        }
        ctx.collectors
            .await_completion(&id, ctx.remote_timeout, fallback)
            .await
    }

    async fn dispatch_batch(
        &self,
        command: &WriteCommand,
        entries: Vec<BatchEntry>,
        topology: &Topology,
    ) -> CacheResult<ReturnValue> {
        let ctx = &self.ctx;
        let split = split_batch(topology, entries, |entry| entry.key.as_slice());
        if !split.unowned.is_empty() {
            return Err(CacheError::NoOwners(topology.id()));
        }

        let id = command.id().clone();
        let collect = command.ack_required();
        if collect {
            ctx.collectors.create_batch(
                id.clone(),
                split.primary_segments(),
                split.backups.clone(),
                topology.id(),
            );
            self.catch_up(&id, topology);
        }

        let mut local = ReturnValue::Map(Default::default());
        for (primary, share) in split.primaries {
            if ctx.is_local(&primary) {
                ctx.metrics.increment_local_primary();
                match self
                    .primary
                    .execute_batch(command, share.entries, topology, |_| {})
                {
                    Ok(applied) if collect => {
                        ctx.collectors.batch_primary_ack(
                            &id,
                            &ctx.address,
                            &applied.segments,
                            applied.previous,
                            topology.id(),
                        );
                    }
                    Ok(applied) => {
                        if let ReturnValue::Map(values) = &mut local {
                            values.extend(applied.previous);
                        }
                    }
                    Err(err) => {
                        ctx.collectors.dispose(&id);
                        return Err(err);
                    }
                }
                continue;
            }

            ctx.metrics.increment_remote_primary();
            let share_command = command.with_entries(share.entries);
            if let Err(err) = ctx.transport.send_to(
                &primary,
                Message::Dispatch(share_command),
                DeliveryOrder::Unordered,
            ) {
                if collect {
                    ctx.collectors
                        .complete_exceptionally(&id, &primary, err, topology.id());
                    break;
                }
                return Err(err);
            }
        }

        if !collect {
            return Ok(local);
        }
        ctx.collectors
            .await_completion(&id, ctx.remote_timeout, local)
            .await
    }

    /// Replay a membership change that landed between reading `topology`
    /// and registering the collector for `id`.
    ///
    /// A change installed after this re-read reaches the collector through
    /// the membership listener, which runs once the new view is visible.
    fn catch_up(&self, id: &CommandInvocationId, topology: &Topology) {
        let current = self.ctx.topology.current_topology();
        if current.id() > topology.id() && current.members_differ(topology) {
            self.ctx.collectors.catch_up_membership(id, current.members());
        }
    }
}

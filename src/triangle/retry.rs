//! Retry Supervisor
//!
//! Wraps the dispatcher on the originating node. A topology-retry signal
//! re-dispatches the same invocation once the topology has moved past the
//! one the failed attempt used; every other error is returned unchanged.
//! Retries are unbounded in number, each one gated on real topology
//! progress.

use std::sync::Arc;

use super::context::NodeContext;
use super::dispatcher::WriteDispatcher;
use crate::command::{ReturnValue, WriteCommand};
use crate::errors::CacheResult;
use crate::observability::{log_event, Event};

/// Drives a write to a final outcome across topology changes
#[derive(Debug)]
pub struct RetrySupervisor {
    ctx: Arc<NodeContext>,
    dispatcher: WriteDispatcher,
}

impl RetrySupervisor {
    /// Supervise attempts made through `dispatcher`
    pub fn new(ctx: Arc<NodeContext>, dispatcher: WriteDispatcher) -> Self {
        Self { ctx, dispatcher }
    }

    /// Run `command` until it completes or fails with a terminal error.
    ///
    /// Best-effort writes (`put_for_external_read`) never fail: their
    /// errors are logged and an empty result is returned.
    pub async fn run(&self, command: WriteCommand) -> CacheResult<ReturnValue> {
        let best_effort = command.flags().put_for_external_read;
        let empty = ReturnValue::empty_for(command.kind());
        let id = command.id().to_string();

        match self.run_until_terminal(command).await {
            Ok(value) => {
                self.ctx.metrics.increment_writes_completed();
                log_event(Event::WriteComplete, &[("id", &id)]);
                Ok(value)
            }
            Err(err) if best_effort => {
                log_event(
                    Event::ExternalReadSwallowed,
                    &[("error", &err.to_string()), ("id", &id)],
                );
                Ok(empty)
            }
            Err(err) => {
                self.ctx.metrics.increment_writes_failed();
                Err(err)
            }
        }
    }

    async fn run_until_terminal(&self, mut command: WriteCommand) -> CacheResult<ReturnValue> {
        loop {
            let err = match self.dispatcher.attempt(&mut command).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_topology_retry() => err,
                Err(err) => return Err(err),
            };

            let current = self.ctx.topology.current_topology().id();
            let next = current.max(command.topology_id() + 1);
            log_event(
                Event::RetryScheduled,
                &[
                    ("cause", err.code()),
                    ("id", &command.id().to_string()),
                    ("wait_for", &next.to_string()),
                ],
            );

            if let Err(wait_err) = self
                .ctx
                .topology
                .wait_for_topology(next, self.ctx.remote_timeout)
                .await
            {
                log_event(
                    Event::RetryAbandoned,
                    &[
                        ("error", &wait_err.to_string()),
                        ("id", &command.id().to_string()),
                    ],
                );
                return Err(wait_err);
            }

            command.mark_retry();
            self.ctx.metrics.increment_retries();
        }
    }
}

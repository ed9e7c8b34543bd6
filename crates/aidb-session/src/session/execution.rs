//! Execution control.
//!
//! `continue` and the step requests move the session to Running before they
//! are sent. If the adapter refuses (or never answers) the move is rolled
//! back, unless a `stopped` event arrived in the meantime: the event always
//! wins.

use super::Session;
use crate::state::SessionStatus;
use aidb_core::{Error, Result};
use aidb_dap::constants::{defaults, requests};
use aidb_dap::{capability_names, ContinueArguments, PauseArguments, StepArguments};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::MutexGuard;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Over,
    Into,
    Out,
}

impl StepKind {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Over => requests::NEXT,
            Self::Into => requests::STEP_IN,
            Self::Out => requests::STEP_OUT,
        }
    }
}

impl Session {
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn continue_(&self, thread_id: Option<i64>) -> Result<()> {
        let _guard = self.exec_guard("continue")?;
        let thread_id = self.target_thread(thread_id).await;
        let args = ContinueArguments {
            thread_id,
            single_thread: None,
        };
        self.resume("continue", requests::CONTINUE, serde_json::to_value(args)?)
            .await
    }

    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn step(&self, kind: StepKind, thread_id: Option<i64>) -> Result<()> {
        let _guard = self.exec_guard("step")?;
        let thread_id = self.target_thread(thread_id).await;
        let args = StepArguments {
            thread_id,
            single_thread: None,
            granularity: None,
        };
        self.resume("step", kind.command(), serde_json::to_value(args)?)
            .await
    }

    /// Ask the adapter to suspend. The session becomes Paused when the
    /// resulting `stopped` event is applied.
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn pause(&self, thread_id: Option<i64>) -> Result<()> {
        let _guard = self.exec_guard("pause")?;
        let client = self.client("pause")?;
        self.require("pause", &[SessionStatus::Running])?;
        let thread_id = self.target_thread(thread_id).await;

        let args = PauseArguments { thread_id };
        let delivered = client
            .send_request_ordered(requests::PAUSE, Some(serde_json::to_value(args)?))
            .await?;
        let events_before = delivered.events_before;
        delivered.response.into_result()?;
        self.core
            .wait_applied(events_before, self.ctx.config.event_apply_timeout())
            .await;
        Ok(())
    }

    /// Restart the debuggee in place, with the original launch arguments
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn restart(&self) -> Result<()> {
        let _guard = self.exec_guard("restart")?;
        let client = self.client("restart")?;
        self.require("restart", &[SessionStatus::Running, SessionStatus::Paused])?;
        if !self.capabilities().await.restart_request() {
            return Err(Error::unsupported(capability_names::RESTART_REQUEST, "restart"));
        }

        let epoch = self.core.state.read().await.stop_epoch;
        let args = json!({ "arguments": Value::Object(self.request.arguments().clone()) });
        let delivered = client.send_request_ordered(requests::RESTART, Some(args)).await?;
        let events_before = delivered.events_before;
        delivered.response.into_result()?;
        self.core
            .wait_applied(events_before, self.ctx.config.event_apply_timeout())
            .await;

        let mut state = self.core.state.write().await;
        if state.stop_epoch == epoch && state.status == SessionStatus::Paused {
            self.core
                .transition_locked(&mut state, SessionStatus::Running)?;
        }
        Ok(())
    }

    /// Send a resuming request with optimistic Running and rollback
    async fn resume(&self, operation: &str, command: &str, args: Value) -> Result<()> {
        let client = self.client(operation)?;
        let epoch = self.core.begin_resume(operation).await?;

        let delivered = match client.send_request_ordered(command, Some(args)).await {
            Ok(delivered) => delivered,
            Err(e) => {
                self.core.rollback_resume(epoch).await;
                return Err(e.into());
            }
        };
        let events_before = delivered.events_before;
        if let Err(e) = delivered.response.into_result() {
            self.core.rollback_resume(epoch).await;
            return Err(e.into());
        }
        self.core
            .wait_applied(events_before, self.ctx.config.event_apply_timeout())
            .await;
        debug!(command, status = %self.status(), "Resumed");
        Ok(())
    }

    fn exec_guard(&self, operation: &str) -> Result<MutexGuard<'_, ()>> {
        self.exec
            .try_lock()
            .map_err(|_| Error::Busy(operation.to_string()))
    }

    async fn target_thread(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(id) => id,
            None => self
                .core
                .state
                .read()
                .await
                .current_thread()
                .unwrap_or(defaults::THREAD_ID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_commands() {
        assert_eq!(StepKind::Over.command(), "next");
        assert_eq!(StepKind::Into.command(), "stepIn");
        assert_eq!(StepKind::Out.command(), "stepOut");
    }

    #[test]
    fn test_step_kind_wire_names() {
        let kind: StepKind = serde_json::from_str("\"into\"").unwrap();
        assert_eq!(kind, StepKind::Into);
    }
}

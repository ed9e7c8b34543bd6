//! Threads, frames, scopes, variables and expression evaluation.
//!
//! Frame ids and variable references are only valid while the debuggee
//! stays stopped; the caches they populate are dropped on every resume.

use super::Session;
use crate::inspect::{
    globals_scope, locals_scope, EvaluationResult, InspectFailure, InspectTarget,
    InspectionReport, StackFrame, ThreadInfo, Variable,
};
use crate::state::SessionStatus;
use aidb_core::{Error, Result};
use aidb_dap::constants::{defaults, requests};
use aidb_dap::{
    DapClient, DapScope, EvaluateArguments, EvaluateResponseBody, ScopesArguments,
    ScopesResponseBody, StackTraceArguments, StackTraceResponseBody, ThreadsResponseBody,
    VariablesArguments, VariablesResponseBody,
};
use tracing::{debug, instrument};

/// Context sent with `evaluate`
const EVALUATE_CONTEXT: &str = "repl";

impl Session {
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn threads(&self) -> Result<Vec<ThreadInfo>> {
        let client = self.client("list threads")?;
        self.require("list threads", &[SessionStatus::Running, SessionStatus::Paused])?;
        let body: ThreadsResponseBody = client
            .send_request(requests::THREADS, None)
            .await?
            .body_as()?;

        let threads: Vec<ThreadInfo> = body.threads.into_iter().map(ThreadInfo::from).collect();
        let mut state = self.core.state.write().await;
        for thread in &threads {
            state.threads.insert(thread.id, thread.name.clone());
        }
        Ok(threads)
    }

    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn stack_trace(&self, thread_id: Option<i64>) -> Result<Vec<StackFrame>> {
        let client = self.client("read the stack")?;
        self.require("read the stack", &[SessionStatus::Paused])?;
        let thread_id = match thread_id {
            Some(id) => id,
            None => self.stopped_thread().await,
        };
        if let Some(frames) = self.core.state.read().await.stack_cache.get(&thread_id) {
            return Ok(frames.clone());
        }

        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: None,
        };
        let body: StackTraceResponseBody = client
            .send_request(requests::STACK_TRACE, Some(serde_json::to_value(args)?))
            .await?
            .body_as()?;
        let frames: Vec<StackFrame> = body.stack_frames.into_iter().map(StackFrame::from).collect();
        debug!(thread_id, frames = frames.len(), "Fetched stack");

        self.core
            .state
            .write()
            .await
            .stack_cache
            .insert(thread_id, frames.clone());
        Ok(frames)
    }

    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let client = self.client("read variables")?;
        self.require("read variables", &[SessionStatus::Paused])?;
        self.fetch_variables(&client, variables_reference).await
    }

    /// Gather one category, or every category for `All`. With `All` each
    /// category is tried on its own and failures land in the report.
    #[instrument(skip(self), fields(session = %self.core.id, target = target.as_str()))]
    pub async fn inspect(&self, target: InspectTarget) -> Result<InspectionReport> {
        let client = self.client("inspect")?;
        let mut report = InspectionReport::default();
        if target != InspectTarget::All {
            self.require("inspect", &allowed_for(target))?;
            self.inspect_one(&client, target, &mut report).await?;
            return Ok(report);
        }

        self.require("inspect", &[SessionStatus::Paused])?;
        for category in InspectTarget::CATEGORIES {
            if let Err(e) = self.inspect_one(&client, category, &mut report).await {
                debug!(category = category.as_str(), "Inspection failed: {}", e);
                report.failures.push(InspectFailure {
                    target: category,
                    error: e.to_string(),
                });
            }
        }
        Ok(report)
    }

    /// Evaluate `expression` in `frame_id`, or the top frame of the stopped
    /// thread. An expression the adapter rejects is reported in the
    /// result's `error`.
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<EvaluationResult> {
        let client = self.client("evaluate")?;
        self.require("evaluate", &[SessionStatus::Paused])?;
        let frame_id = match frame_id {
            Some(id) => id,
            None => self.top_frame().await?.id,
        };

        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id: Some(frame_id),
            context: Some(EVALUATE_CONTEXT.to_string()),
        };
        let response = client
            .send_request(requests::EVALUATE, Some(serde_json::to_value(args)?))
            .await?;
        if !response.success {
            return Ok(EvaluationResult::failed(response.error_message()));
        }
        let body: EvaluateResponseBody = response.body_as()?;
        Ok(EvaluationResult::from(body))
    }

    async fn inspect_one(
        &self,
        client: &DapClient,
        target: InspectTarget,
        report: &mut InspectionReport,
    ) -> Result<()> {
        match target {
            InspectTarget::Threads => report.threads = Some(self.threads().await?),
            InspectTarget::Stack => report.stack = Some(self.stack_trace(None).await?),
            InspectTarget::Locals => {
                let scopes = self.top_scopes(client).await?;
                let scope = locals_scope(&scopes)
                    .ok_or_else(|| Error::Evaluation("no locals scope in the top frame".to_string()))?;
                report.locals = Some(self.fetch_variables(client, scope.variables_reference).await?);
            }
            InspectTarget::Globals => {
                let scopes = self.top_scopes(client).await?;
                let scope = globals_scope(&scopes)
                    .ok_or_else(|| Error::Evaluation("no globals scope in the top frame".to_string()))?;
                report.globals = Some(self.fetch_variables(client, scope.variables_reference).await?);
            }
            InspectTarget::All => {
                return Err(Error::Internal("inspect_one called with All".to_string()))
            }
        }
        Ok(())
    }

    async fn top_frame(&self) -> Result<StackFrame> {
        self.stack_trace(None)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Evaluation("stopped thread has no stack frames".to_string()))
    }

    async fn top_scopes(&self, client: &DapClient) -> Result<Vec<DapScope>> {
        let frame = self.top_frame().await?;
        let args = ScopesArguments { frame_id: frame.id };
        let body: ScopesResponseBody = client
            .send_request(requests::SCOPES, Some(serde_json::to_value(args)?))
            .await?
            .body_as()?;
        Ok(body.scopes)
    }

    async fn fetch_variables(&self, client: &DapClient, reference: i64) -> Result<Vec<Variable>> {
        if let Some(cached) = self.core.state.read().await.variables_cache.get(&reference) {
            return Ok(cached.clone());
        }
        let args = VariablesArguments {
            variables_reference: reference,
            filter: None,
            start: None,
            count: None,
        };
        let body: VariablesResponseBody = client
            .send_request(requests::VARIABLES, Some(serde_json::to_value(args)?))
            .await?
            .body_as()?;
        let variables: Vec<Variable> = body.variables.into_iter().map(Variable::from).collect();
        self.core
            .state
            .write()
            .await
            .variables_cache
            .insert(reference, variables.clone());
        Ok(variables)
    }

    async fn stopped_thread(&self) -> i64 {
        self.core
            .state
            .read()
            .await
            .current_thread()
            .unwrap_or(defaults::THREAD_ID)
    }
}

/// Threads can be listed while running; everything else needs a stop
fn allowed_for(target: InspectTarget) -> Vec<SessionStatus> {
    match target {
        InspectTarget::Threads => vec![SessionStatus::Running, SessionStatus::Paused],
        _ => vec![SessionStatus::Paused],
    }
}

//! Adapter-initiated requests and child sessions.
//!
//! `startDebugging` asks the client to open another session against the
//! same adapter (js-debug does this for every worker and child process).
//! The reverse handler cannot build that session itself, since it runs on
//! the parent's receive loop, so it forwards a [`ChildRequest`] to whoever
//! owns the registry.

use crate::registry::SessionRegistry;
use crate::session::{Session, SessionContext, SessionOptions, StartRequest};
use aidb_core::{Error, Result, SessionId};
use aidb_dap::constants::reverse_requests;
use aidb_dap::{
    AdapterSpec, ProcessHandle, ProcessManager, ProcessSpec, Request, ReverseRequestHandler,
    RunInTerminalRequestArguments, RunInTerminalResponseBody, StartDebuggingRequestArguments,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

/// A `startDebugging` request waiting to become a child session
#[derive(Debug, Clone)]
pub struct ChildRequest {
    pub parent_id: SessionId,
    pub request: StartRequest,
}

/// Answers reverse requests for one session
pub(crate) struct SessionReverseHandler {
    session_id: SessionId,
    processes: ProcessManager,
    debuggees: Arc<StdMutex<Vec<Arc<dyn ProcessHandle>>>>,
    child_requests: Option<mpsc::UnboundedSender<ChildRequest>>,
}

impl SessionReverseHandler {
    pub fn new(
        session_id: SessionId,
        processes: ProcessManager,
        debuggees: Arc<StdMutex<Vec<Arc<dyn ProcessHandle>>>>,
        child_requests: Option<mpsc::UnboundedSender<ChildRequest>>,
    ) -> Self {
        Self {
            session_id,
            processes,
            debuggees,
            child_requests,
        }
    }

    fn run_in_terminal(&self, args: RunInTerminalRequestArguments) -> aidb_dap::Result<RunInTerminalResponseBody> {
        let Some((program, rest)) = args.args.split_first() else {
            return Err(aidb_dap::Error::Protocol("runInTerminal without arguments".to_string()));
        };

        let mut spec = ProcessSpec::new(program.clone(), self.session_id.as_str()).args(rest.iter().cloned());
        if !args.cwd.is_empty() {
            spec = spec.cwd(args.cwd.clone());
        }
        for (key, value) in args.env.unwrap_or_default() {
            spec = match value {
                Some(value) => spec.env(key, value),
                None => spec.env_remove(key),
            };
        }

        let process = self.processes.start(spec)?;
        let process_id = process.pid();
        match self.debuggees.lock() {
            Ok(mut debuggees) => debuggees.push(process),
            Err(poisoned) => poisoned.into_inner().push(process),
        }
        info!(session = %self.session_id, ?process_id, "Started debuggee for runInTerminal");
        Ok(RunInTerminalResponseBody {
            process_id,
            shell_process_id: None,
        })
    }

    fn start_debugging(&self, args: StartDebuggingRequestArguments) -> aidb_dap::Result<()> {
        let request = StartRequest::from_kind(&args.request, args.configuration).ok_or_else(|| {
            aidb_dap::Error::NotSupported(format!("startDebugging request '{}'", args.request))
        })?;
        let Some(sender) = &self.child_requests else {
            return Err(aidb_dap::Error::Protocol("child sessions are not enabled".to_string()));
        };
        sender
            .send(ChildRequest {
                parent_id: self.session_id.clone(),
                request,
            })
            .map_err(|_| aidb_dap::Error::Protocol("session service is shutting down".to_string()))
    }
}

#[async_trait]
impl ReverseRequestHandler for SessionReverseHandler {
    async fn handle(&self, request: &Request) -> aidb_dap::Result<Option<serde_json::Value>> {
        match request.command.as_str() {
            reverse_requests::RUN_IN_TERMINAL => {
                let body = self.run_in_terminal(request.arguments_as()?)?;
                Ok(Some(serde_json::to_value(body)?))
            }
            reverse_requests::START_DEBUGGING => {
                self.start_debugging(request.arguments_as()?)?;
                Ok(None)
            }
            other => {
                warn!(session = %self.session_id, command = other, "Unsupported reverse request");
                Err(aidb_dap::Error::NotSupported(other.to_string()))
            }
        }
    }
}

/// Builds child sessions that reuse their parent's adapter endpoint
#[derive(Clone)]
pub struct ChildSessionManager {
    registry: Arc<SessionRegistry>,
    ctx: SessionContext,
}

impl ChildSessionManager {
    pub fn new(registry: Arc<SessionRegistry>, ctx: SessionContext) -> Self {
        Self { registry, ctx }
    }

    /// Register and start a child of `parent_id`. The child connects to
    /// the parent adapter's TCP endpoint; a parent without one cannot have
    /// children.
    #[instrument(skip(self, request), fields(parent = %parent_id))]
    pub async fn create_child_session(&self, parent_id: &SessionId, request: StartRequest) -> Result<SessionId> {
        let parent = self.registry.get(parent_id).await?;
        let (host, port) = parent.tcp_endpoint().ok_or_else(|| {
            Error::Config(format!(
                "session {} has no TCP adapter endpoint for child sessions",
                parent_id
            ))
        })?;

        let adapter = AdapterSpec::connect(parent.adapter_id(), host, port);
        let options = SessionOptions::new(parent.language(), adapter, request).child_of(parent_id.clone());
        let child_id = options.id.clone();
        let child = Arc::new(Session::new(options, self.ctx.clone()));
        self.registry.insert_child(parent_id, child.clone()).await?;

        if let Err(e) = child.start().await {
            warn!(child = %child_id, "Child session failed to start: {}", e);
            self.registry.remove_tree(&child_id).await;
            return Err(e);
        }

        info!(child = %child_id, "Child session started");
        parent.emit_child_created(&child_id);
        Ok(child_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler(child_requests: Option<mpsc::UnboundedSender<ChildRequest>>) -> SessionReverseHandler {
        SessionReverseHandler::new(
            SessionId::new("parent"),
            ProcessManager::default(),
            Arc::new(StdMutex::new(Vec::new())),
            child_requests,
        )
    }

    #[tokio::test]
    async fn test_start_debugging_forwards_child_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = Request::new(3, reverse_requests::START_DEBUGGING).with_arguments(json!({
            "request": "attach",
            "configuration": {"type": "pwa-node", "__pendingTargetId": "t1"}
        }));
        let body = handler(Some(tx)).handle(&request).await.unwrap();
        assert!(body.is_none());

        let child = rx.recv().await.unwrap();
        assert_eq!(child.parent_id, SessionId::new("parent"));
        assert_eq!(child.request.command(), "attach");
        assert_eq!(child.request.arguments()["__pendingTargetId"], "t1");
    }

    #[tokio::test]
    async fn test_start_debugging_refused_without_owner() {
        let request = Request::new(3, reverse_requests::START_DEBUGGING)
            .with_arguments(json!({"request": "launch", "configuration": {}}));
        assert!(handler(None).handle(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_reverse_request_is_refused() {
        let request = Request::new(4, "customRequest");
        let err = handler(None).handle(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "not supported: customRequest");
    }

    #[tokio::test]
    async fn test_run_in_terminal_needs_a_command() {
        let request = Request::new(5, reverse_requests::RUN_IN_TERMINAL)
            .with_arguments(json!({"cwd": "/tmp", "args": []}));
        assert!(handler(None).handle(&request).await.is_err());
    }
}

//! A live debug session: one adapter connection driven through the DAP
//! lifecycle.
//!
//! A session owns its transport (through the [`DapClient`]), the adapter
//! process and port lease, and the event bridge task. They are created in
//! [`start`](Session::start) and torn down together in
//! [`stop`](Session::stop).
//!
//! Operations are split by concern:
//! - `handshake` - connect, `initialize`, launch/attach, configuration
//! - `breakpoint_ops` - source and function breakpoints
//! - `execution` - continue, step, pause, restart
//! - `inspection` - threads, stack, scopes, variables, evaluate

mod breakpoint_ops;
mod execution;
mod handshake;
mod inspection;
pub(crate) mod shared;

pub use execution::StepKind;
pub use shared::LifecycleNotice;

use crate::child::ChildRequest;
use crate::events::{OutputLine, SessionEvent, SessionEventKind};
use crate::inspect::ThreadInfo;
use crate::state::{SessionStatus, StopInfo};
use aidb_config::SessionConfig;
use aidb_core::{Error, Language, Result, SessionId};
use aidb_dap::constants::requests;
use aidb_dap::{
    AdapterLauncher, AdapterSpec, Capabilities, DapClient, DisconnectArguments, LogResult,
    PortLease, ProcessHandle, ProcessManager, TerminateArguments,
};
use serde::Serialize;
use serde_json::{Map, Value};
use shared::SessionCore;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Lines of adapter output included in a status report
const REPORT_OUTPUT_LINES: usize = 20;

/// How the debuggee is brought under the adapter's control
#[derive(Debug, Clone, PartialEq)]
pub enum StartRequest {
    Launch(Map<String, Value>),
    Attach(Map<String, Value>),
}

impl StartRequest {
    /// Build from a JSON object; anything else yields an empty argument map
    pub fn launch(arguments: Value) -> Self {
        Self::Launch(into_map(arguments))
    }

    pub fn attach(arguments: Value) -> Self {
        Self::Attach(into_map(arguments))
    }

    /// Request kind as named by `startDebugging` ("launch" or "attach")
    pub fn from_kind(kind: &str, configuration: Map<String, Value>) -> Option<Self> {
        match kind {
            "launch" => Some(Self::Launch(configuration)),
            "attach" => Some(Self::Attach(configuration)),
            _ => None,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::Launch(_) => requests::LAUNCH,
            Self::Attach(_) => requests::ATTACH,
        }
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        match self {
            Self::Launch(args) | Self::Attach(args) => args,
        }
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub id: SessionId,
    pub language: Language,
    pub adapter: AdapterSpec,
    pub request: StartRequest,
    pub parent_id: Option<SessionId>,
}

impl SessionOptions {
    pub fn new(language: Language, adapter: AdapterSpec, request: StartRequest) -> Self {
        Self {
            id: SessionId::generate(),
            language,
            adapter,
            request,
            parent_id: None,
        }
    }

    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    pub fn child_of(mut self, parent: SessionId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// Plumbing a session borrows from whoever owns it
#[derive(Clone)]
pub struct SessionContext {
    pub config: SessionConfig,
    pub launcher: Arc<dyn AdapterLauncher>,
    /// Starts `runInTerminal` debuggees
    pub processes: ProcessManager,
    /// Listener fan-out, shared by parent and child sessions
    pub events: broadcast::Sender<SessionEvent>,
    pub lifecycle: Option<mpsc::UnboundedSender<LifecycleNotice>>,
    /// Where `startDebugging` requests go; `None` refuses them
    pub child_requests: Option<mpsc::UnboundedSender<ChildRequest>>,
}

impl SessionContext {
    pub fn new(config: SessionConfig, launcher: Arc<dyn AdapterLauncher>) -> Self {
        let (events, _) = broadcast::channel(config.listener_channel_capacity.max(1));
        Self {
            config,
            launcher,
            processes: ProcessManager::default(),
            events,
            lifecycle: None,
            child_requests: None,
        }
    }

    pub fn with_processes(mut self, processes: ProcessManager) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<SessionEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: mpsc::UnboundedSender<LifecycleNotice>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_child_requests(mut self, requests: mpsc::UnboundedSender<ChildRequest>) -> Self {
        self.child_requests = Some(requests);
        self
    }
}

/// Snapshot of a session for callers
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub id: SessionId,
    pub language: Language,
    pub parent_id: Option<SessionId>,
    pub children: Vec<SessionId>,
    pub status: SessionStatus,
    pub stop: Option<StopInfo>,
    pub threads: Vec<ThreadInfo>,
    pub breakpoint_count: usize,
    pub capabilities: Capabilities,
    pub exit_code: Option<i64>,
    pub failure: Option<String>,
    pub recent_output: Vec<OutputLine>,
}

#[derive(Default)]
struct Resources {
    process: Option<Arc<dyn ProcessHandle>>,
    lease: Option<PortLease>,
    bridge: Option<JoinHandle<()>>,
    released: bool,
}

pub struct Session {
    core: Arc<SessionCore>,
    ctx: SessionContext,
    adapter: AdapterSpec,
    request: StartRequest,
    client: OnceLock<Arc<DapClient>>,
    tcp_endpoint: OnceLock<(String, u16)>,
    resources: Mutex<Resources>,
    /// At most one continue/step/pause/restart in flight
    exec: Mutex<()>,
    /// Processes started for `runInTerminal`
    debuggees: Arc<StdMutex<Vec<Arc<dyn ProcessHandle>>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.core.id)
            .field("language", &self.core.language)
            .field("status", &self.core.status())
            .field("parent_id", &self.core.parent_id)
            .finish()
    }
}

impl Session {
    pub fn new(options: SessionOptions, ctx: SessionContext) -> Self {
        let core = SessionCore::new(
            options.id,
            options.language,
            options.parent_id,
            ctx.events.clone(),
            ctx.lifecycle.clone(),
            ctx.config.output_history_lines,
        );
        Self {
            core: Arc::new(core),
            ctx,
            adapter: options.adapter,
            request: options.request,
            client: OnceLock::new(),
            tcp_endpoint: OnceLock::new(),
            resources: Mutex::new(Resources::default()),
            exec: Mutex::new(()),
            debuggees: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.core.id
    }

    pub fn language(&self) -> Language {
        self.core.language
    }

    pub fn parent_id(&self) -> Option<&SessionId> {
        self.core.parent_id.as_ref()
    }

    pub fn is_child(&self) -> bool {
        self.core.parent_id.is_some()
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter.adapter_id
    }

    pub fn status(&self) -> SessionStatus {
        self.core.status()
    }

    /// Where a child session can reach this session's adapter
    pub fn tcp_endpoint(&self) -> Option<(String, u16)> {
        self.tcp_endpoint.get().cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.subscribe_events()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.core.subscribe_status()
    }

    /// Block until the session reaches one of `targets` or a terminal
    /// state, whichever comes first
    pub async fn wait_for_status(
        &self,
        targets: &[SessionStatus],
        timeout: Duration,
    ) -> Result<SessionStatus> {
        let mut rx = self.core.subscribe_status();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| targets.contains(s) || s.is_terminal()),
        )
        .await;
        match waited {
            Ok(Ok(status)) => Ok(*status),
            Ok(Err(_)) => Ok(self.status()),
            Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
        }
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.core.state.read().await.capabilities.clone()
    }

    pub fn recent_output(&self, n: usize) -> Vec<OutputLine> {
        self.core.recent_output(n)
    }

    pub async fn report(&self) -> SessionReport {
        let breakpoint_count = self.core.breakpoints().count();
        let state = self.core.state.read().await;
        SessionReport {
            id: self.core.id.clone(),
            language: self.core.language,
            parent_id: self.core.parent_id.clone(),
            children: Vec::new(),
            status: state.status,
            stop: state.stop.clone(),
            threads: state
                .threads
                .iter()
                .map(|(id, name)| ThreadInfo {
                    id: *id,
                    name: name.clone(),
                })
                .collect(),
            breakpoint_count,
            capabilities: state.capabilities.clone(),
            exit_code: state.exit_code,
            failure: state.failure.clone(),
            recent_output: self.core.recent_output(REPORT_OUTPUT_LINES),
        }
    }

    pub(crate) fn emit_child_created(&self, child_id: &SessionId) {
        self.core.emit(SessionEventKind::ChildSessionCreated {
            child_id: child_id.clone(),
        });
    }

    /// The connected client, or `InvalidState` naming `operation` when the
    /// session has not connected yet
    pub(crate) fn client(&self, operation: &str) -> Result<Arc<DapClient>> {
        self.client
            .get()
            .cloned()
            .ok_or_else(|| Error::invalid_state(operation, self.status()))
    }

    /// Fail with `InvalidState` unless the session is in one of `allowed`
    pub(crate) fn require(&self, operation: &str, allowed: &[SessionStatus]) -> Result<SessionStatus> {
        let status = self.status();
        if allowed.contains(&status) {
            Ok(status)
        } else {
            Err(Error::invalid_state(operation, status))
        }
    }

    /// Tear everything down: goodbye to the adapter, close the client,
    /// stop debuggees and the adapter process, release the port. Idempotent.
    ///
    /// A process that refuses to die leaves the session `Failed` and is
    /// reported as an error.
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn stop(&self) -> Result<()> {
        let mut resources = self.resources.lock().await;
        if resources.released {
            return Ok(());
        }
        resources.released = true;

        let status = self.status();
        if status == SessionStatus::Created {
            self.core.transition(SessionStatus::Terminated).await?;
            return Ok(());
        }
        if !status.is_terminal() {
            self.core.transition(SessionStatus::Terminating).await?;
        }

        if let Some(client) = self.client.get() {
            if client.is_alive() {
                self.say_goodbye(client, status.is_ready()).await;
            }
            client.close(self.ctx.config.disconnect_timeout()).await;
        }

        let mut failures = Vec::new();
        let debuggees = match self.debuggees.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for debuggee in debuggees {
            if let Err(e) = debuggee.stop(self.ctx.processes.stop_timeout()).await {
                failures.push(format!("debuggee {:?}: {}", debuggee.pid(), e));
            }
        }
        if let Some(process) = resources.process.take() {
            match process.stop(self.ctx.processes.stop_timeout()).await {
                Ok(outcome) => debug!(?outcome, "Adapter process stopped"),
                Err(e) => failures.push(format!("adapter {:?}: {}", process.pid(), e)),
            }
        }
        if let Some(lease) = resources.lease.take() {
            lease.release_async().await.warn_ok("Releasing adapter port");
        }
        if let Some(mut bridge) = resources.bridge.take() {
            if tokio::time::timeout(self.ctx.config.disconnect_timeout(), &mut bridge)
                .await
                .is_err()
            {
                warn!("Event bridge did not finish, aborting");
                bridge.abort();
            }
        }

        if failures.is_empty() {
            if self.status() == SessionStatus::Terminating {
                self.core.transition(SessionStatus::Terminated).await?;
            }
            info!(status = %self.status(), "Session stopped");
            Ok(())
        } else {
            let message = failures.join("; ");
            self.core.fail(&message).await;
            Err(Error::Process(message))
        }
    }

    async fn say_goodbye(&self, client: &DapClient, live: bool) {
        let timeout = self.ctx.config.disconnect_timeout();
        let terminate = live && self.capabilities().await.terminate_request();
        if terminate {
            let args = serde_json::to_value(TerminateArguments::default()).ok();
            if let Some(pending) = client
                .start_request_with_timeout(requests::TERMINATE, args, timeout)
                .await
                .debug_ok("Sending terminate")
            {
                pending.wait().await.debug_ok("Waiting for terminate");
            }
        }

        let args = DisconnectArguments {
            restart: None,
            terminate_debuggee: Some(true),
            suspend_debuggee: None,
        };
        if let Some(pending) = client
            .start_request_with_timeout(requests::DISCONNECT, serde_json::to_value(args).ok(), timeout)
            .await
            .debug_ok("Sending disconnect")
        {
            pending.wait().await.debug_ok("Waiting for disconnect");
        }
    }
}

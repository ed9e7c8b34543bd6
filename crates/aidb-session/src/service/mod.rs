//! DebugService - the surface the MCP layer talks to
//!
//! Owns the session registry, the project pool and the orphan scanner, and
//! routes every call to the right session. There is no global state: each
//! service is built explicitly and torn down with [`DebugService::shutdown`].
//!
//! Two background tasks run per service:
//! - a lifecycle watcher that stops and unregisters sessions which ended on
//!   their own (`terminated`/`exited` events, lost connections)
//! - a consumer for `startDebugging` requests that builds child sessions

mod builder;

pub use builder::DebugServiceBuilder;

use crate::child::ChildSessionManager;
use crate::events::SessionEvent;
use crate::inspect::{EvaluationResult, InspectTarget, InspectionReport};
use crate::pool::ProjectPool;
use crate::registry::SessionRegistry;
use crate::session::{
    Session, SessionContext, SessionOptions, SessionReport, StartRequest, StepKind,
};
use crate::state::SessionStatus;
use aidb_config::Config;
use aidb_core::{BreakpointSpec, Error, Language, Result, SessionId, VerifiedBreakpoint};
use aidb_dap::{cleanup_orphaned_processes, AdapterSpec, Breakpoint, OrphanCleanupReport, ProcessScanner};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Project whose pooled bridge a session needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub path: PathBuf,
    pub name: String,
}

/// Everything needed to start a top-level session
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
    pub language: Language,
    pub request: StartRequest,
    pub cwd: Option<PathBuf>,
    /// Overrides the adapter configured for `language`
    pub adapter: Option<AdapterSpec>,
    pub project: Option<ProjectRef>,
    /// Set during the handshake, before the debuggee runs
    pub breakpoints: Vec<(String, Vec<BreakpointSpec>)>,
}

impl StartSessionRequest {
    pub fn new(language: Language, request: StartRequest) -> Self {
        Self {
            language,
            request,
            cwd: None,
            adapter: None,
            project: None,
            breakpoints: Vec::new(),
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn adapter(mut self, adapter: AdapterSpec) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn project(mut self, path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        self.project = Some(ProjectRef {
            path: path.into(),
            name: name.into(),
        });
        self
    }

    pub fn breakpoints(mut self, file: impl Into<String>, specs: Vec<BreakpointSpec>) -> Self {
        self.breakpoints.push((file.into(), specs));
        self
    }
}

/// One line of `list_sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub language: Language,
    pub status: SessionStatus,
    pub parent_id: Option<SessionId>,
}

pub(crate) struct ServiceInner {
    config: Config,
    registry: Arc<SessionRegistry>,
    pool: Option<ProjectPool>,
    scanner: Arc<dyn ProcessScanner>,
    ctx: SessionContext,
    children: ChildSessionManager,
}

impl ServiceInner {
    /// Unregister a session with its descendants and stop them, children
    /// first. Returns the first stop error; every session is still stopped.
    async fn stop_tree(&self, id: &SessionId) -> Result<()> {
        let sessions = self.registry.remove_tree(id).await;
        if sessions.is_empty() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        let mut first_error = None;
        for session in sessions {
            if let Err(e) = session.stop().await {
                warn!(session = %session.id(), "Stop failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct DebugService {
    inner: Arc<ServiceInner>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for DebugService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl DebugService {
    pub fn builder(config: Config) -> DebugServiceBuilder {
        DebugServiceBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pool(&self) -> Option<&ProjectPool> {
        self.inner.pool.as_ref()
    }

    /// Launch or attach a new session and run its handshake. A session
    /// that fails to start is stopped and never stays registered.
    ///
    /// Sessions for a pooled project connect to the project's bridge
    /// unless the request names its own adapter.
    #[instrument(skip(self, request), fields(language = %request.language))]
    pub async fn start_session(&self, request: StartSessionRequest) -> Result<SessionId> {
        let bridge = match &request.project {
            Some(project) => {
                let pool = self.inner.pool.as_ref().ok_or_else(|| {
                    Error::Config("project pool is not configured (pool.bridge_command)".to_string())
                })?;
                Some(pool.get_or_start_bridge(&project.path, &project.name).await?)
            }
            None => None,
        };

        let configured = self.inner.config.adapter_for(request.language);
        let adapter = match (request.adapter, bridge) {
            (Some(adapter), _) => adapter,
            (None, Some(bridge)) => {
                let (host, port) = bridge.dap_endpoint().await.ok_or_else(|| {
                    Error::Config(format!("bridge {} is not serving DAP", bridge.id()))
                })?;
                let adapter_id = configured
                    .map(|command| command.adapter_id.clone())
                    .unwrap_or_else(|| request.language.as_str().to_string());
                debug!(bridge = %bridge.id(), %host, port, "Connecting session to project bridge");
                AdapterSpec::connect(adapter_id, host, port)
            }
            (None, None) => {
                let command = configured.ok_or_else(|| {
                    Error::Config(format!("no adapter configured for {}", request.language))
                })?;
                AdapterSpec::launch(command.clone())
            }
        };
        let adapter = match request.cwd {
            Some(cwd) => adapter.with_cwd(cwd),
            None => adapter,
        };

        let options = SessionOptions::new(request.language, adapter, request.request);
        let id = options.id.clone();
        let session = Arc::new(Session::new(options, self.inner.ctx.clone()));
        self.inner.registry.insert(session.clone()).await?;

        if let Err(e) = session.start_with(&request.breakpoints).await {
            self.inner.registry.remove_tree(&id).await;
            return Err(e);
        }
        info!(session = %id, "Session registered and running");
        Ok(id)
    }

    pub async fn session(&self, id: &SessionId) -> Result<Arc<Session>> {
        self.inner.registry.get(id).await
    }

    pub async fn set_breakpoints(
        &self,
        id: &SessionId,
        file: &str,
        specs: &[BreakpointSpec],
    ) -> Result<Vec<VerifiedBreakpoint>> {
        self.session(id).await?.set_breakpoints(file, specs).await
    }

    pub async fn remove_breakpoints(
        &self,
        id: &SessionId,
        file: &str,
        lines: &[u32],
    ) -> Result<Vec<VerifiedBreakpoint>> {
        self.session(id).await?.remove_breakpoints(file, lines).await
    }

    pub async fn clear_breakpoints(&self, id: &SessionId, file: &str) -> Result<()> {
        self.session(id).await?.clear_breakpoints(file).await
    }

    pub async fn list_breakpoints(&self, id: &SessionId) -> Result<Vec<(String, Vec<VerifiedBreakpoint>)>> {
        Ok(self.session(id).await?.list_breakpoints().await)
    }

    pub async fn set_function_breakpoints(&self, id: &SessionId, names: &[String]) -> Result<Vec<Breakpoint>> {
        self.session(id).await?.set_function_breakpoints(names).await
    }

    pub async fn continue_(&self, id: &SessionId, thread_id: Option<i64>) -> Result<()> {
        self.session(id).await?.continue_(thread_id).await
    }

    pub async fn pause(&self, id: &SessionId, thread_id: Option<i64>) -> Result<()> {
        self.session(id).await?.pause(thread_id).await
    }

    pub async fn step(&self, id: &SessionId, kind: StepKind, thread_id: Option<i64>) -> Result<()> {
        self.session(id).await?.step(kind, thread_id).await
    }

    pub async fn restart(&self, id: &SessionId) -> Result<()> {
        self.session(id).await?.restart().await
    }

    pub async fn inspect(&self, id: &SessionId, target: InspectTarget) -> Result<InspectionReport> {
        self.session(id).await?.inspect(target).await
    }

    pub async fn evaluate(
        &self,
        id: &SessionId,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<EvaluationResult> {
        self.session(id).await?.evaluate(expression, frame_id).await
    }

    /// Stop a session and all of its children
    #[instrument(skip(self))]
    pub async fn stop_session(&self, id: &SessionId) -> Result<()> {
        self.inner.stop_tree(id).await
    }

    /// Start a child of `parent` against the parent's adapter
    pub async fn create_child_session(&self, parent: &SessionId, request: StartRequest) -> Result<SessionId> {
        self.inner.children.create_child_session(parent, request).await
    }

    pub async fn wait_for_status(
        &self,
        id: &SessionId,
        targets: &[SessionStatus],
        timeout: Duration,
    ) -> Result<SessionStatus> {
        self.session(id).await?.wait_for_status(targets, timeout).await
    }

    pub async fn status(&self, id: &SessionId) -> Result<SessionReport> {
        let session = self.session(id).await?;
        let mut report = session.report().await;
        report.children = self.inner.registry.children(id).await;
        Ok(report)
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .registry
            .sessions()
            .await
            .iter()
            .map(|s| SessionSummary {
                id: s.id().clone(),
                language: s.language(),
                status: s.status(),
                parent_id: s.parent_id().cloned(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Events from every session, parents and children alike
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.ctx.events.subscribe()
    }

    /// Terminate tagged processes owned by neither a live session nor a
    /// pooled bridge
    #[instrument(skip(self))]
    pub async fn cleanup_orphans(&self) -> OrphanCleanupReport {
        let mut active: HashSet<String> = self
            .inner
            .registry
            .ids()
            .await
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        if let Some(pool) = &self.inner.pool {
            active.extend(pool.active_ids().await);
        }
        let report = cleanup_orphaned_processes(
            self.inner.scanner.as_ref(),
            &active,
            self.inner.config.orphan.min_age(),
        )
        .await;
        info!(
            terminated = report.terminated,
            failed = report.failed,
            "Orphan cleanup finished"
        );
        report
    }

    /// Stop every session and pooled bridge
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        for root in self.inner.registry.roots().await {
            if let Err(e) = self.inner.stop_tree(&root).await {
                warn!(session = %root, "Stop during shutdown failed: {}", e);
            }
        }
        if let Some(pool) = &self.inner.pool {
            pool.shutdown_pool().await;
        }
        info!("Debug service shut down");
    }
}

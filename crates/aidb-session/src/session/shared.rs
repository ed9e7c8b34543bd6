//! State shared between a session's operations and its event bridge

use crate::breakpoints::BreakpointStore;
use crate::events::{OutputLine, OutputLog, SessionEvent, SessionEventKind};
use crate::state::{SessionState, SessionStatus, StopInfo};
use aidb_core::{Error, Language, Result, SessionId};
use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Sent to the owner of a session when the session winds down on its own
/// (adapter terminated, debuggee exited, connection lost)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleNotice {
    pub session_id: SessionId,
    pub status: SessionStatus,
}

pub(crate) struct SessionCore {
    pub id: SessionId,
    pub language: Language,
    pub parent_id: Option<SessionId>,
    pub state: RwLock<SessionState>,
    /// Serializes breakpoint operations, held across their adapter round
    /// trips and the handshake flush. The event bridge never takes it.
    pub breakpoint_ops: Mutex<()>,
    /// Locked only for in-memory updates, never across an await
    breakpoints: StdMutex<BreakpointStore>,
    status_tx: watch::Sender<SessionStatus>,
    applied_tx: watch::Sender<u64>,
    initialized_tx: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,
    output: StdMutex<OutputLog>,
    lifecycle: Option<mpsc::UnboundedSender<LifecycleNotice>>,
}

impl SessionCore {
    pub fn new(
        id: SessionId,
        language: Language,
        parent_id: Option<SessionId>,
        events: broadcast::Sender<SessionEvent>,
        lifecycle: Option<mpsc::UnboundedSender<LifecycleNotice>>,
        output_lines: usize,
    ) -> Self {
        Self {
            id,
            language,
            parent_id,
            state: RwLock::new(SessionState::new()),
            breakpoint_ops: Mutex::new(()),
            breakpoints: StdMutex::new(BreakpointStore::new()),
            status_tx: watch::channel(SessionStatus::Created).0,
            applied_tx: watch::channel(0).0,
            initialized_tx: watch::channel(false).0,
            events,
            output: StdMutex::new(OutputLog::new(output_lines)),
            lifecycle,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub fn emit(&self, kind: SessionEventKind) {
        // No listeners is fine
        let _ = self.events.send(SessionEvent {
            session_id: self.id.clone(),
            kind,
        });
    }

    /// Move to `to` under an already held state lock. Staying in the same
    /// state is a no-op; an edge the state machine lacks is `InvalidState`.
    pub fn transition_locked(&self, state: &mut SessionState, to: SessionStatus) -> Result<SessionStatus> {
        let from = state.status;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            return Err(Error::invalid_state(format!("move to {}", to), from));
        }
        state.status = to;
        if to == SessionStatus::Running {
            state.enter_running();
        }
        self.status_tx.send_replace(to);
        debug!(session = %self.id, %from, %to, "Session status changed");
        self.emit(SessionEventKind::StatusChanged { from, to });
        Ok(from)
    }

    pub async fn transition(&self, to: SessionStatus) -> Result<SessionStatus> {
        let mut state = self.state.write().await;
        self.transition_locked(&mut state, to)
    }

    /// Drive the session to `Failed` unless it already finished
    pub async fn fail(&self, reason: &str) {
        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return;
        }
        state.failure = Some(reason.to_string());
        if self.transition_locked(&mut state, SessionStatus::Failed).is_ok() {
            warn!(session = %self.id, "Session failed: {}", reason);
            self.notify(SessionStatus::Failed);
        }
    }

    /// `terminated`/`exited` from the adapter
    pub async fn begin_terminating(&self) {
        let mut state = self.state.write().await;
        if matches!(
            state.status,
            SessionStatus::Terminating | SessionStatus::Terminated | SessionStatus::Failed
        ) {
            return;
        }
        if self
            .transition_locked(&mut state, SessionStatus::Terminating)
            .is_ok()
        {
            info!(session = %self.id, "Session terminating");
            self.notify(SessionStatus::Terminating);
        }
    }

    fn notify(&self, status: SessionStatus) {
        if let Some(lifecycle) = &self.lifecycle {
            let _ = lifecycle.send(LifecycleNotice {
                session_id: self.id.clone(),
                status,
            });
        }
    }

    pub async fn apply_stopped(&self, stop: StopInfo) {
        let mut state = self.state.write().await;
        state.record_stop(stop);
        if matches!(state.status, SessionStatus::Running | SessionStatus::Initialized) {
            let _ = self.transition_locked(&mut state, SessionStatus::Paused);
        }
    }

    pub async fn apply_continued(&self) {
        let mut state = self.state.write().await;
        if state.status == SessionStatus::Paused {
            let _ = self.transition_locked(&mut state, SessionStatus::Running);
        }
    }

    /// Optimistically leave Paused for a continue/step. Returns the stop
    /// epoch the rollback must still match.
    pub async fn begin_resume(&self, operation: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        if state.status != SessionStatus::Paused {
            return Err(Error::invalid_state(operation, state.status));
        }
        let epoch = state.stop_epoch;
        state.resumed_from = state.stop.clone();
        self.transition_locked(&mut state, SessionStatus::Running)?;
        Ok(epoch)
    }

    /// Undo `begin_resume` after the adapter refused or never answered.
    /// A `stopped` event that arrived meanwhile wins.
    pub async fn rollback_resume(&self, epoch: u64) {
        let mut state = self.state.write().await;
        if state.stop_epoch != epoch || state.status != SessionStatus::Running {
            return;
        }
        let previous = state.resumed_from.take();
        if self
            .transition_locked(&mut state, SessionStatus::Paused)
            .is_ok()
        {
            state.stop = previous;
            debug!(session = %self.id, "Resume rolled back");
        }
    }

    pub fn mark_applied(&self, count: u64) {
        self.applied_tx.send_replace(count);
    }

    /// Wait until the bridge has applied `watermark` events. Gives up after
    /// `timeout`; returns whether the watermark was reached.
    pub async fn wait_applied(&self, watermark: u64, timeout: Duration) -> bool {
        let mut rx = self.applied_tx.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|applied| *applied >= watermark)).await;
        match reached {
            Ok(Ok(_)) => true,
            _ => {
                warn!(session = %self.id, watermark, "Timed out waiting for events to be applied");
                false
            }
        }
    }

    pub fn mark_initialized(&self) {
        self.initialized_tx.send_replace(true);
    }

    pub async fn wait_initialized(&self, timeout: Duration) -> bool {
        let mut rx = self.initialized_tx.subscribe();
        let initialized = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|seen| *seen)).await,
            Ok(Ok(_))
        );
        initialized
    }

    pub fn breakpoints(&self) -> StdMutexGuard<'_, BreakpointStore> {
        match self.breakpoints.lock() {
            Ok(store) => store,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push_output(&self, line: OutputLine) {
        match self.output.lock() {
            Ok(mut log) => log.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }

    pub fn recent_output(&self, n: usize) -> Vec<OutputLine> {
        match self.output.lock() {
            Ok(log) => log.recent(n),
            Err(poisoned) => poisoned.into_inner().recent(n),
        }
    }
}

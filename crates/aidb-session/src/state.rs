//! Session lifecycle states and the state a session accumulates while it
//! talks to an adapter.

use crate::inspect::{StackFrame, Variable};
use aidb_dap::Capabilities;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Lifecycle of a debug session.
///
/// ```text
/// Created -> Starting -> Initialized -> Running <-> Paused -> Terminating -> Terminated
/// ```
///
/// `Failed` is reachable from every non-terminal state and absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Starting,
    Initialized,
    Running,
    Paused,
    Terminating,
    Terminated,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 8] = [
        Self::Created,
        Self::Starting,
        Self::Initialized,
        Self::Running,
        Self::Paused,
        Self::Terminating,
        Self::Terminated,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// The adapter has answered `initialize` and the session is not winding down
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Initialized | Self::Running | Self::Paused)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    /// Staying in the same state is not an edge.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Created, Starting) | (Created, Terminated) => true,
            (Starting, Initialized) => true,
            (Initialized, Running) | (Initialized, Paused) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Starting | Initialized | Running | Paused, Terminating) => true,
            (Terminating, Terminated) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why and where the debuggee last stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopInfo {
    pub reason: String,
    pub thread_id: i64,
    pub description: Option<String>,
    pub hit_breakpoint_ids: Vec<i64>,
    pub all_threads_stopped: bool,
}

/// Mutable session state. Only the event bridge and the session's own
/// operations write to it, always under the session's state lock.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub status: SessionStatus,
    pub capabilities: Capabilities,
    pub stop: Option<StopInfo>,
    /// Incremented on every `stopped` event
    pub stop_epoch: u64,
    /// Stop info saved by an optimistic resume, restored on rollback
    pub resumed_from: Option<StopInfo>,
    /// Known threads, id -> name ("" until a `threads` response names it)
    pub threads: BTreeMap<i64, String>,
    pub exit_code: Option<i64>,
    pub failure: Option<String>,
    pub stack_cache: HashMap<i64, Vec<StackFrame>>,
    pub variables_cache: HashMap<i64, Vec<Variable>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Created,
            capabilities: Capabilities::default(),
            stop: None,
            stop_epoch: 0,
            resumed_from: None,
            threads: BTreeMap::new(),
            exit_code: None,
            failure: None,
            stack_cache: HashMap::new(),
            variables_cache: HashMap::new(),
        }
    }

    /// Frames and variable references are only valid while stopped
    pub fn invalidate_caches(&mut self) {
        self.stack_cache.clear();
        self.variables_cache.clear();
    }

    pub fn record_stop(&mut self, stop: StopInfo) {
        self.stop_epoch += 1;
        self.resumed_from = None;
        self.threads.entry(stop.thread_id).or_default();
        self.stop = Some(stop);
        self.invalidate_caches();
    }

    pub fn enter_running(&mut self) {
        self.stop = None;
        self.invalidate_caches();
    }

    /// Thread a resume or inspection should target when the caller names none
    pub fn current_thread(&self) -> Option<i64> {
        self.stop
            .as_ref()
            .map(|s| s.thread_id)
            .or_else(|| self.threads.keys().next().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn status() -> impl Strategy<Value = SessionStatus> {
        proptest::sample::select(SessionStatus::ALL.to_vec())
    }

    #[test]
    fn test_happy_path_is_connected() {
        use SessionStatus::*;
        let path = [Created, Starting, Initialized, Running, Paused, Running, Terminating, Terminated];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_stop_on_entry_edge() {
        assert!(SessionStatus::Initialized.can_transition_to(SessionStatus::Paused));
    }

    #[test]
    fn test_record_stop_bumps_epoch_and_clears_caches() {
        let mut state = SessionState::new();
        state.stack_cache.insert(1, Vec::new());
        state.record_stop(StopInfo {
            reason: "breakpoint".to_string(),
            thread_id: 7,
            description: None,
            hit_breakpoint_ids: vec![1],
            all_threads_stopped: true,
        });
        assert_eq!(state.stop_epoch, 1);
        assert!(state.stack_cache.is_empty());
        assert_eq!(state.current_thread(), Some(7));

        state.enter_running();
        assert!(state.stop.is_none());
        assert_eq!(state.current_thread(), Some(7));
    }

    proptest! {
        #[test]
        fn terminal_states_have_no_exits(from in status(), to in status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn failed_reachable_from_every_live_state(from in status()) {
            prop_assert_eq!(
                from.can_transition_to(SessionStatus::Failed),
                !from.is_terminal()
            );
        }

        #[test]
        fn no_self_edges(s in status()) {
            prop_assert!(!s.can_transition_to(s));
        }

        #[test]
        fn nothing_returns_to_created(from in status()) {
            prop_assert!(!from.can_transition_to(SessionStatus::Created));
        }
    }
}

//! Event bridge: the one place adapter events turn into session state.
//!
//! A single task per session consumes the client's ordered event stream,
//! applies each event to the session, forwards it to listeners and then
//! bumps the "applied" watermark. Requests that carry an event watermark
//! wait on it, so a caller never observes a response before the events the
//! adapter sent ahead of it.

use crate::session::shared::SessionCore;
use crate::state::{SessionStatus, StopInfo};
use aidb_core::SessionId;
use aidb_dap::constants::{defaults, events};
use aidb_dap::{
    BreakpointEventBody, ContinuedEventBody, Event, ExitedEventBody, OutputEventBody,
    StoppedEventBody, ThreadEventBody,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Something that happened to a session, as seen by listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    Initialized,
    Stopped(StopInfo),
    Continued {
        thread_id: i64,
        all_threads: bool,
    },
    Thread {
        reason: String,
        thread_id: i64,
    },
    Output {
        category: String,
        text: String,
    },
    Breakpoint {
        reason: String,
        id: Option<i64>,
        verified: bool,
        line: Option<u32>,
    },
    Exited {
        exit_code: i64,
    },
    Terminated,
    ChildSessionCreated {
        child_id: SessionId,
    },
    /// Events the session does not interpret, passed through as-is
    Other {
        event: String,
        body: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub category: String,
    pub text: String,
}

/// Most recent `output` events, bounded by line count
#[derive(Debug)]
pub struct OutputLog {
    lines: VecDeque<OutputLine>,
    capacity: usize,
    dropped: u64,
}

impl OutputLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: OutputLine) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    pub fn recent(&self, n: usize) -> Vec<OutputLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Spawn the bridge task for one session
pub(crate) fn spawn_bridge(core: Arc<SessionCore>, stream: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(run_bridge(core, stream))
}

async fn run_bridge(core: Arc<SessionCore>, mut stream: mpsc::Receiver<Event>) {
    debug!(session = %core.id, "Event bridge started");
    let mut applied = 0u64;
    while let Some(event) = stream.recv().await {
        trace!(session = %core.id, event = %event.event, seq = event.seq, "Applying event");
        apply(&core, event).await;
        applied += 1;
        core.mark_applied(applied);
    }

    // Wake anyone waiting on a watermark that will never arrive
    core.mark_applied(u64::MAX);
    let status = core.status();
    if !matches!(
        status,
        SessionStatus::Terminating | SessionStatus::Terminated | SessionStatus::Failed
    ) {
        core.fail("adapter connection lost").await;
    }
    debug!(session = %core.id, applied, "Event bridge finished");
}

async fn apply(core: &SessionCore, event: Event) {
    let kind = match event.event.as_str() {
        events::INITIALIZED => {
            core.mark_initialized();
            SessionEventKind::Initialized
        }
        events::STOPPED => match event.body_as::<StoppedEventBody>() {
            Ok(body) => {
                let stop = StopInfo {
                    reason: body.reason,
                    thread_id: body.thread_id.unwrap_or(defaults::THREAD_ID),
                    description: body.description.or(body.text),
                    hit_breakpoint_ids: body.hit_breakpoint_ids.unwrap_or_default(),
                    all_threads_stopped: body.all_threads_stopped.unwrap_or(false),
                };
                core.apply_stopped(stop.clone()).await;
                SessionEventKind::Stopped(stop)
            }
            Err(e) => return skip_malformed(core, &event, e),
        },
        events::CONTINUED => match event.body_as::<ContinuedEventBody>() {
            Ok(body) => {
                core.apply_continued().await;
                SessionEventKind::Continued {
                    thread_id: body.thread_id,
                    all_threads: body.all_threads_continued.unwrap_or(true),
                }
            }
            Err(e) => return skip_malformed(core, &event, e),
        },
        events::EXITED => {
            let exit_code = event
                .body_as::<ExitedEventBody>()
                .map(|b| b.exit_code)
                .unwrap_or(-1);
            core.state.write().await.exit_code = Some(exit_code);
            info!(session = %core.id, exit_code, "Debuggee exited");
            core.emit(SessionEventKind::Exited { exit_code });
            core.begin_terminating().await;
            return;
        }
        events::TERMINATED => {
            info!(session = %core.id, "Adapter reported termination");
            core.emit(SessionEventKind::Terminated);
            core.begin_terminating().await;
            return;
        }
        events::THREAD => match event.body_as::<ThreadEventBody>() {
            Ok(body) => {
                let mut state = core.state.write().await;
                if body.reason == "exited" {
                    state.threads.remove(&body.thread_id);
                } else {
                    state.threads.entry(body.thread_id).or_default();
                }
                SessionEventKind::Thread {
                    reason: body.reason,
                    thread_id: body.thread_id,
                }
            }
            Err(e) => return skip_malformed(core, &event, e),
        },
        events::OUTPUT => match event.body_as::<OutputEventBody>() {
            Ok(body) => {
                let line = OutputLine {
                    category: body.category.map_or("console", |c| c.as_str()).to_string(),
                    text: body.output,
                };
                core.push_output(line.clone());
                SessionEventKind::Output {
                    category: line.category,
                    text: line.text,
                }
            }
            Err(e) => return skip_malformed(core, &event, e),
        },
        events::BREAKPOINT => match event.body_as::<BreakpointEventBody>() {
            Ok(body) => {
                let matched = core.breakpoints().apply_event(&body.breakpoint);
                if !matched {
                    debug!(session = %core.id, id = ?body.breakpoint.id, "Breakpoint event for unknown id");
                }
                SessionEventKind::Breakpoint {
                    reason: body.reason,
                    id: body.breakpoint.id,
                    verified: body.breakpoint.verified,
                    line: body.breakpoint.line,
                }
            }
            Err(e) => return skip_malformed(core, &event, e),
        },
        _ => SessionEventKind::Other {
            event: event.event,
            body: event.body,
        },
    };
    core.emit(kind);
}

fn skip_malformed(core: &SessionCore, event: &Event, error: impl std::fmt::Display) {
    warn!(session = %core.id, event = %event.event, "Ignoring event with malformed body: {}", error);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> OutputLine {
        OutputLine {
            category: "stdout".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_output_log_keeps_most_recent() {
        let mut log = OutputLog::new(2);
        log.push(line("a"));
        log.push(line("b"));
        log.push(line("c"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 1);
        let recent: Vec<_> = log.recent(10).into_iter().map(|l| l.text).collect();
        assert_eq!(recent, vec!["b", "c"]);
        assert_eq!(log.recent(1)[0].text, "c");
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = SessionEvent {
            session_id: SessionId::new("s1"),
            kind: SessionEventKind::Exited { exit_code: 3 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["type"], "exited");
        assert_eq!(json["exit_code"], 3);
    }
}

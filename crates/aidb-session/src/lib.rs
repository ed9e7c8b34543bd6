//! # aidb Session
//!
//! Debug sessions on top of `aidb-dap`, and the service that manages them.
//!
//! ## Layout
//!
//! ```text
//! DebugService
//!   ├── SessionRegistry   sessions by id, parent/child tree
//!   │     └── Session     state machine + handshake + operations
//!   │           └── event bridge task (adapter events -> session state)
//!   ├── ChildSessionManager   startDebugging -> child sessions
//!   ├── ProjectPool       LRU pool of per-project bridges
//!   └── orphan cleanup    tagged processes nobody owns
//! ```
//!
//! ## Modules
//!
//! - `state` - lifecycle states and transition table
//! - `session` - one adapter connection driven through DAP
//! - `events` - event bridge and the events listeners see
//! - `inspect` - threads, frames, variables, evaluation results
//! - `registry` - live sessions with parent/child links
//! - `child` - reverse requests and child sessions
//! - `pool` - project bridge pool
//! - `service` - [`DebugService`], the entry point for callers

mod breakpoints;

pub mod child;
pub mod events;
pub mod inspect;
pub mod pool;
pub mod registry;
pub mod service;
pub mod session;
pub mod state;

pub use child::{ChildRequest, ChildSessionManager};
pub use events::{OutputLine, OutputLog, SessionEvent, SessionEventKind};
pub use inspect::{
    EvaluationResult, InspectFailure, InspectTarget, InspectionReport, StackFrame, ThreadInfo,
    Variable,
};
pub use pool::{normalize_project_path, Bridge, BridgeFactory, ProcessBridge, ProcessBridgeFactory, ProjectPool};
pub use registry::SessionRegistry;
pub use service::{DebugService, DebugServiceBuilder, ProjectRef, SessionSummary, StartSessionRequest};
pub use session::{
    LifecycleNotice, Session, SessionContext, SessionOptions, SessionReport, StartRequest,
    StepKind,
};
pub use state::{SessionStatus, StopInfo};

//! aidb DAP - Debug Adapter Protocol plumbing
//!
//! Everything between a session and a debug adapter process:
//!
//! - `protocol` / `framing` - message types and `Content-Length` framing
//! - `transport` - framed channel over TCP or a stream pair
//! - `receiver` / `client` - background demultiplexing, request correlation,
//!   ordered event delivery
//! - `adapter` - launching or connecting to adapters
//! - `process` - tagged subprocess supervision
//! - `ports` - cross-process port leases
//! - `orphan` - cleanup of tagged processes left behind by a crash
//!
//! Nothing here knows about sessions or breakpoints; that lives in
//! `aidb-session`.

pub mod adapter;
pub mod client;
pub mod constants;
pub mod error;
pub mod ext;
pub mod framing;
pub mod orphan;
pub mod ports;
pub mod process;
pub mod protocol;
pub mod receiver;
pub mod transport;

pub use adapter::{AdapterEndpoint, AdapterLauncher, AdapterSpec, LaunchedAdapter, ProcessAdapterLauncher};
pub use client::{ClientConfig, DapClient, Delivered, PendingRequest, ReverseRequestHandler};
pub use error::{Error, Result};
pub use ext::LogResult;
pub use framing::FrameDecoder;
pub use orphan::{
    cleanup_orphaned_processes, OrphanCleanupReport, ProcessScanner, SystemProcessScanner,
    TaggedProcess,
};
pub use ports::{PortAllocator, PortLease};
pub use process::{
    CapturedOutput, ManagedProcess, ProcessHandle, ProcessManager, ProcessSpec, StopOutcome,
};
pub use protocol::*;
pub use receiver::MessageReceiver;
pub use transport::{Incoming, StreamTransport, Transport, TransportState};

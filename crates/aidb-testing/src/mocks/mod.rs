//! Test doubles for the seams of the session engine
//!
//! - [`MockAdapter`] / [`MockLauncher`]: a scripted DAP peer behind the
//!   `AdapterLauncher` seam
//! - [`MockBridgeFactory`]: pooled project bridges
//! - [`MockProcessScanner`]: process table for orphan cleanup

mod adapter;
mod bridge;
mod launcher;
mod scanner;

pub use adapter::{
    full_capabilities, MockAdapter, MockAdapterHandle, Reply, GLOBALS_REF, LOCALS_REF,
    MAIN_THREAD_ID, TOP_FRAME_ID,
};
pub use bridge::{MockBridge, MockBridgeFactory};
pub use launcher::{LaunchRecord, MockLauncher, MockProcess};
pub use scanner::MockProcessScanner;

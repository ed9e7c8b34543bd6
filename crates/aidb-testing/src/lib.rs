//! Test utilities for aidb
//!
//! # Mocks
//!
//! - [`MockAdapter`] - scripted DAP peer over an in-memory pipe, with
//!   debugpy-like defaults for every request the engine sends
//! - [`MockLauncher`] - `AdapterLauncher` that hands out mock adapters and
//!   records every launch
//! - [`MockBridgeFactory`] - project pool bridges with start/stop counters
//! - [`MockProcessScanner`] - in-memory process table for orphan cleanup
//!
//! # Fixtures
//!
//! - [`fixtures::test_config`] - config with fast timeouts and all adapters
//! - [`fixtures::launch_program`] - a Python `launch` request
//!
//! # Usage
//!
//! ```no_run
//! use aidb_testing::{fixtures, MockAdapter, MockLauncher, Reply};
//! use aidb_session::{DebugService, StartSessionRequest};
//! use aidb_core::Language;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> aidb_core::Result<()> {
//! let launcher = Arc::new(MockLauncher::new(
//!     MockAdapter::new().once("evaluate", Reply::fail("NameError")),
//! ));
//! let service = DebugService::builder(fixtures::test_config())
//!     .launcher(launcher.clone())
//!     .build()?;
//! let id = service
//!     .start_session(StartSessionRequest::new(
//!         Language::Python,
//!         fixtures::launch_program("/app/main.py"),
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod mocks;
pub mod proptest_config;

pub use mocks::{
    full_capabilities, LaunchRecord, MockAdapter, MockAdapterHandle, MockBridge,
    MockBridgeFactory, MockLauncher, MockProcess, MockProcessScanner, Reply, GLOBALS_REF,
    LOCALS_REF, MAIN_THREAD_ID, TOP_FRAME_ID,
};

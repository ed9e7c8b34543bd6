//! Shared setup for service-level tests

#![allow(dead_code)]

use aidb_config::Config;
use aidb_core::{Language, SessionId};
use aidb_session::{DebugService, SessionStatus, StartSessionRequest};
use aidb_testing::{fixtures, MockAdapter, MockAdapterHandle, MockLauncher};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub service: DebugService,
    pub launcher: Arc<MockLauncher>,
}

impl Harness {
    pub fn new(script: MockAdapter) -> Self {
        Self::with_launcher(MockLauncher::new(script))
    }

    pub fn with_launcher(launcher: MockLauncher) -> Self {
        Self::with_config(launcher, fixtures::test_config())
    }

    pub fn with_config(launcher: MockLauncher, config: Config) -> Self {
        aidb_logging::init_test();
        let launcher = Arc::new(launcher);
        let service = DebugService::builder(config)
            .launcher(launcher.clone())
            .build()
            .expect("service builds");
        Self { service, launcher }
    }

    pub async fn start(&self) -> SessionId {
        self.service
            .start_session(python_request())
            .await
            .expect("session starts")
    }

    /// Start a session and wait for the entry stop
    pub async fn start_paused(&self) -> SessionId {
        let id = self.start().await;
        let status = self
            .service
            .wait_for_status(&id, &[SessionStatus::Paused], WAIT)
            .await
            .expect("session reaches paused");
        assert_eq!(status, SessionStatus::Paused);
        id
    }

    pub fn adapter(&self) -> MockAdapterHandle {
        self.launcher.last_handle().expect("an adapter was launched")
    }
}

pub fn python_request() -> StartSessionRequest {
    StartSessionRequest::new(Language::Python, fixtures::launch_program("/app/main.py"))
}

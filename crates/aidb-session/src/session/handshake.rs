//! Connection and the DAP start-up sequence.
//!
//! ```text
//! initialize -> launch/attach (reply deferred) -> [initialized event]
//!            -> setBreakpoints per file -> configurationDone -> launch/attach reply
//! ```
//!
//! Adapters such as debugpy only answer `launch` after `configurationDone`,
//! so the launch request is started first and awaited last.

use super::Session;
use crate::child::SessionReverseHandler;
use crate::events::spawn_bridge;
use crate::state::SessionStatus;
use aidb_core::{BreakpointSpec, Error, Result};
use aidb_dap::constants::requests;
use aidb_dap::{Capabilities, ClientConfig, DapClient, InitializeRequestArguments, LogResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

impl Session {
    /// Launch (or attach to) the debuggee and run the handshake
    pub async fn start(&self) -> Result<()> {
        self.start_with(&[]).await
    }

    /// Like [`start`](Self::start), with breakpoints flushed during the
    /// handshake so they are in place before the debuggee runs
    #[instrument(skip(self, initial), fields(session = %self.core.id, language = %self.core.language))]
    pub async fn start_with(&self, initial: &[(String, Vec<BreakpointSpec>)]) -> Result<()> {
        self.core.transition(SessionStatus::Starting).await?;
        info!(adapter = %self.adapter.adapter_id, request = self.request.command(), "Starting session");

        match self.run_handshake(initial).await {
            Ok(()) => {
                info!(status = %self.status(), "Session started");
                Ok(())
            }
            Err(e) => {
                self.core.fail(&e.to_string()).await;
                self.stop().await.warn_ok("Cleaning up after failed start");
                Err(e)
            }
        }
    }

    async fn run_handshake(&self, initial: &[(String, Vec<BreakpointSpec>)]) -> Result<()> {
        let client = self.connect().await?;
        self.initialize(&client).await?;
        for (file, specs) in initial {
            self.set_breakpoints(file, specs).await?;
        }
        self.configure_and_launch(&client).await
    }

    /// Bring up the adapter, the client and the event bridge
    async fn connect(&self) -> Result<Arc<DapClient>> {
        let launched = self
            .ctx
            .launcher
            .launch(&self.adapter, self.core.id.as_str())
            .await?;
        if let Some(endpoint) = launched.tcp_endpoint.clone() {
            let _ = self.tcp_endpoint.set(endpoint);
        }

        let client = Arc::new(DapClient::start(
            launched.transport.clone(),
            ClientConfig::from(&self.ctx.config),
        ));
        client
            .set_reverse_handler(Arc::new(SessionReverseHandler::new(
                self.core.id.clone(),
                self.ctx.processes.clone(),
                self.debuggees.clone(),
                self.ctx.child_requests.clone(),
            )))
            .await;

        let stream = client
            .take_event_stream()
            .await
            .ok_or_else(|| Error::Internal("event stream already taken".to_string()))?;

        {
            let mut resources = self.resources.lock().await;
            resources.process = launched.process;
            resources.lease = launched.lease;
            resources.bridge = Some(spawn_bridge(self.core.clone(), stream));
        }
        if self.client.set(client.clone()).is_err() {
            return Err(Error::invalid_state("connect", "already connected"));
        }
        debug!(endpoint = %client.transport().endpoint(), "Adapter connected");
        Ok(client)
    }

    async fn initialize(&self, client: &DapClient) -> Result<()> {
        let args = InitializeRequestArguments::for_adapter(self.adapter.adapter_id.clone());
        let body = client
            .send_request(requests::INITIALIZE, Some(serde_json::to_value(args)?))
            .await?
            .into_result()?;
        let capabilities = match body {
            Some(body) => serde_json::from_value::<Capabilities>(body)?,
            None => Capabilities::default(),
        };
        debug!(?capabilities, "Adapter capabilities");

        let mut state = self.core.state.write().await;
        state.capabilities = capabilities;
        self.core
            .transition_locked(&mut state, SessionStatus::Initialized)?;
        Ok(())
    }

    async fn configure_and_launch(&self, client: &DapClient) -> Result<()> {
        let config = &self.ctx.config;
        let pending = client
            .start_request(
                self.request.command(),
                Some(Value::Object(self.request.arguments().clone())),
            )
            .await?;

        if !self.core.wait_initialized(config.initialized_event_timeout()).await {
            warn!(
                timeout_ms = config.initialized_event_timeout_ms,
                "No initialized event, configuring anyway"
            );
        }

        self.flush_breakpoints(client).await;

        if self.capabilities().await.configuration_done_request() {
            client
                .send_request(requests::CONFIGURATION_DONE, None)
                .await?
                .into_result()?;
        }

        let delivered = pending.wait().await?;
        let events_before = delivered.events_before;
        delivered.response.into_result()?;
        self.core
            .wait_applied(events_before, config.event_apply_timeout())
            .await;

        // A stopped event (stop on entry) may already have moved us to Paused
        let mut state = self.core.state.write().await;
        if state.status == SessionStatus::Initialized {
            self.core
                .transition_locked(&mut state, SessionStatus::Running)?;
        }
        Ok(())
    }
}

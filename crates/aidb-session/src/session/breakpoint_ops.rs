//! Source and function breakpoints.
//!
//! Until the handshake flushes, breakpoint calls only update the store; the
//! flush then sends one `setBreakpoints` per file. Afterwards every call
//! sends the file's full set immediately.
//!
//! Operations queue on `breakpoint_ops` for the whole round trip. The store
//! itself is only locked around in-memory changes, so the event bridge can
//! keep applying `breakpoint` events while a request is in flight.

use super::Session;
use crate::breakpoints::{check_supported, pair_verified, FileBreakpoints};
use aidb_core::{BreakpointSpec, Error, Result, VerifiedBreakpoint};
use aidb_dap::constants::requests;
use aidb_dap::{
    capability_names, Breakpoint, DapClient, FunctionBreakpoint, SetBreakpointsArguments,
    SetBreakpointsResponseBody, SetFunctionBreakpointsArguments, Source, SourceBreakpoint,
};
use tracing::{debug, instrument, warn};

impl Session {
    /// Add or replace breakpoints in `file`. Returns the file's full set as
    /// the adapter verified it (unverified while still buffered).
    #[instrument(skip(self, specs), fields(session = %self.core.id, count = specs.len()))]
    pub async fn set_breakpoints(
        &self,
        file: &str,
        specs: &[BreakpointSpec],
    ) -> Result<Vec<VerifiedBreakpoint>> {
        self.require_ready("set breakpoints")?;
        check_supported(specs, &self.capabilities().await)?;

        let _ops = self.core.breakpoint_ops.lock().await;
        let (previous, all) = {
            let mut store = self.core.breakpoints();
            (store.file_snapshot(file), store.merge(file, specs))
        };
        self.sync_file(file, previous, all).await
    }

    /// Remove the breakpoints on `lines` of `file`
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn remove_breakpoints(&self, file: &str, lines: &[u32]) -> Result<Vec<VerifiedBreakpoint>> {
        self.require_ready("remove breakpoints")?;
        let _ops = self.core.breakpoint_ops.lock().await;
        let (previous, remaining) = {
            let mut store = self.core.breakpoints();
            (store.file_snapshot(file), store.remove_lines(file, lines))
        };
        match remaining {
            Some(remaining) => self.sync_file(file, previous, remaining).await,
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn clear_breakpoints(&self, file: &str) -> Result<()> {
        self.require_ready("clear breakpoints")?;
        let _ops = self.core.breakpoint_ops.lock().await;
        let (previous, had_entry) = {
            let mut store = self.core.breakpoints();
            (store.file_snapshot(file), store.clear(file))
        };
        if had_entry {
            self.sync_file(file, previous, Vec::new()).await?;
        }
        Ok(())
    }

    /// Every file with breakpoints, in first-touched order
    pub async fn list_breakpoints(&self) -> Vec<(String, Vec<VerifiedBreakpoint>)> {
        self.core.breakpoints().list()
    }

    /// Replace all function breakpoints
    #[instrument(skip(self), fields(session = %self.core.id))]
    pub async fn set_function_breakpoints(&self, names: &[String]) -> Result<Vec<Breakpoint>> {
        self.require_ready("set function breakpoints")?;
        if !self.capabilities().await.function_breakpoints() {
            return Err(Error::unsupported(
                capability_names::FUNCTION_BREAKPOINTS,
                "function breakpoints",
            ));
        }

        let _ops = self.core.breakpoint_ops.lock().await;
        let (previous, configured) = {
            let mut store = self.core.breakpoints();
            let previous = store.functions().to_vec();
            store.set_functions(names.to_vec());
            (previous, store.is_configured())
        };
        if !configured {
            return Ok(Vec::new());
        }
        let sent = match self.client("set function breakpoints") {
            Ok(client) => send_function_breakpoints(&client, names).await,
            Err(e) => Err(e),
        };
        if sent.is_err() {
            self.core.breakpoints().set_functions(previous);
        }
        sent
    }

    /// Send everything buffered before `configurationDone`. Failures are
    /// logged per file; the handshake carries on.
    pub(super) async fn flush_breakpoints(&self, client: &DapClient) {
        let _ops = self.core.breakpoint_ops.lock().await;
        let files = self.core.breakpoints().files();
        for file in files {
            let specs = self.core.breakpoints().specs(&file);
            if specs.is_empty() {
                continue;
            }
            match self.send_source_breakpoints(client, &file, specs).await {
                Ok(verified) => {
                    debug!(file = %file, count = verified.len(), "Flushed breakpoints");
                    self.core.breakpoints().apply_verified(&file, verified);
                }
                Err(e) => warn!(file = %file, "Failed to set breakpoints during handshake: {}", e),
            }
        }

        let functions = self.core.breakpoints().functions().to_vec();
        if !functions.is_empty() {
            if let Err(e) = send_function_breakpoints(client, &functions).await {
                warn!("Failed to set function breakpoints during handshake: {}", e);
            }
        }
        self.core.breakpoints().mark_configured();
    }

    /// Push the file's set to the adapter, or keep it buffered before the
    /// handshake flush. A failed send puts back `previous`. Callers hold
    /// `breakpoint_ops`.
    async fn sync_file(
        &self,
        file: &str,
        previous: Option<FileBreakpoints>,
        specs: Vec<BreakpointSpec>,
    ) -> Result<Vec<VerifiedBreakpoint>> {
        {
            let store = self.core.breakpoints();
            if !store.is_configured() {
                debug!(file, "Buffering breakpoints until configuration");
                return Ok(store.verified(file));
            }
        }

        let sent = match self.client("set breakpoints") {
            Ok(client) => self.send_source_breakpoints(&client, file, specs).await,
            Err(e) => Err(e),
        };
        let mut store = self.core.breakpoints();
        match sent {
            Ok(verified) => {
                store.apply_verified(file, verified.clone());
                Ok(verified)
            }
            Err(e) => {
                store.restore_file(file, previous);
                Err(e)
            }
        }
    }

    /// `setBreakpoints` for one file. Events the adapter sent ahead of the
    /// response are applied before the result is returned, so an earlier
    /// `breakpoint` event cannot overwrite it.
    async fn send_source_breakpoints(
        &self,
        client: &DapClient,
        file: &str,
        specs: Vec<BreakpointSpec>,
    ) -> Result<Vec<VerifiedBreakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source::from_path(file),
            breakpoints: Some(specs.iter().map(SourceBreakpoint::from).collect()),
            source_modified: Some(false),
        };
        let delivered = client
            .send_request_ordered(requests::SET_BREAKPOINTS, Some(serde_json::to_value(args)?))
            .await?;
        let body: SetBreakpointsResponseBody = delivered.response.body_as()?;
        self.core
            .wait_applied(delivered.events_before, self.ctx.config.event_apply_timeout())
            .await;
        Ok(pair_verified(specs, body.breakpoints))
    }

    fn require_ready(&self, operation: &str) -> Result<()> {
        let status = self.status();
        if status.is_ready() {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, status))
        }
    }
}

async fn send_function_breakpoints(client: &DapClient, names: &[String]) -> Result<Vec<Breakpoint>> {
    let args = SetFunctionBreakpointsArguments {
        breakpoints: names
            .iter()
            .map(|name| FunctionBreakpoint {
                name: name.clone(),
                condition: None,
                hit_condition: None,
            })
            .collect(),
    };
    let response = client
        .send_request(requests::SET_FUNCTION_BREAKPOINTS, Some(serde_json::to_value(args)?))
        .await?;
    let body: SetBreakpointsResponseBody = response.body_as()?;
    Ok(body.breakpoints)
}

//! In-memory adapter launcher
//!
//! Every launch gets a fresh duplex pipe with a [`MockAdapter`] on the
//! far end. Launches of a `Connect` endpoint (child sessions) use the
//! child script when one is set.

use super::adapter::{MockAdapter, MockAdapterHandle};
use aidb_dap::{
    AdapterEndpoint, AdapterLauncher, AdapterSpec, CapturedOutput, Error, LaunchedAdapter,
    ProcessHandle, Result, StopOutcome, StreamTransport,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, split};

const PIPE_CAPACITY: usize = 64 * 1024;
const FIRST_MOCK_PORT: u16 = 47000;

/// One call to [`AdapterLauncher::launch`]
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub spec: AdapterSpec,
    pub tag: String,
    pub handle: MockAdapterHandle,
    /// `None` for connect-only launches
    pub process: Option<Arc<MockProcess>>,
}

pub struct MockLauncher {
    script: MockAdapter,
    child_script: Option<MockAdapter>,
    fail_with: Option<String>,
    next_port: AtomicU16,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl MockLauncher {
    pub fn new(script: MockAdapter) -> Self {
        Self {
            script,
            child_script: None,
            fail_with: None,
            next_port: AtomicU16::new(FIRST_MOCK_PORT),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Script used for `Connect` launches
    pub fn with_child_script(mut self, script: MockAdapter) -> Self {
        self.child_script = Some(script);
        self
    }

    /// Every launch fails with a process error
    pub fn failing(message: impl Into<String>) -> Self {
        let mut launcher = Self::new(MockAdapter::new());
        launcher.fail_with = Some(message.into());
        launcher
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        lock(&self.launches).clone()
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.launches).len()
    }

    pub fn handle(&self, index: usize) -> Option<MockAdapterHandle> {
        lock(&self.launches).get(index).map(|r| r.handle.clone())
    }

    pub fn last_handle(&self) -> Option<MockAdapterHandle> {
        lock(&self.launches).last().map(|r| r.handle.clone())
    }

    /// Processes of every `Launch` so far
    pub fn processes(&self) -> Vec<Arc<MockProcess>> {
        lock(&self.launches)
            .iter()
            .filter_map(|r| r.process.clone())
            .collect()
    }

    /// Wait until launch number `index` (zero based) has happened
    pub async fn wait_for_launch(&self, index: usize, timeout: Duration) -> Option<LaunchRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(record) = lock(&self.launches).get(index).cloned() {
                return Some(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl AdapterLauncher for MockLauncher {
    async fn launch(&self, spec: &AdapterSpec, tag: &str) -> Result<LaunchedAdapter> {
        if let Some(message) = &self.fail_with {
            return Err(Error::Process(message.clone()));
        }

        let (client_side, adapter_side) = duplex(PIPE_CAPACITY);
        let (reader, writer) = split(client_side);
        let transport = Arc::new(StreamTransport::from_streams(reader, writer, format!("mock:{}", tag)));

        let (script, process, endpoint) = match &spec.endpoint {
            AdapterEndpoint::Launch(_) => {
                let port = self.next_port.fetch_add(1, Ordering::SeqCst);
                (
                    self.script.clone(),
                    Some(Arc::new(MockProcess::new(tag))),
                    ("127.0.0.1".to_string(), port),
                )
            }
            AdapterEndpoint::Connect { host, port } => (
                self.child_script.clone().unwrap_or_else(|| self.script.clone()),
                None,
                (host.clone(), *port),
            ),
        };
        let handle = script.spawn(adapter_side);

        lock(&self.launches).push(LaunchRecord {
            spec: spec.clone(),
            tag: tag.to_string(),
            handle,
            process: process.clone(),
        });

        Ok(LaunchedAdapter {
            transport,
            process: process.map(|p| p as Arc<dyn ProcessHandle>),
            lease: None,
            tcp_endpoint: Some(endpoint),
        })
    }
}

/// Adapter process stand-in that only tracks stop calls
#[derive(Debug)]
pub struct MockProcess {
    tag: String,
    running: AtomicBool,
    refuse_stop: AtomicBool,
    stop_calls: AtomicUsize,
}

impl MockProcess {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            running: AtomicBool::new(true),
            refuse_stop: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Make `stop` fail as if the process ignored its signals
    pub fn refuse_stop(&self) {
        self.refuse_stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHandle for MockProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&self, _timeout: Duration) -> Result<StopOutcome> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_stop.load(Ordering::SeqCst) {
            return Err(Error::Process(format!("{} ignored SIGTERM and SIGKILL", self.tag)));
        }
        if self.running.swap(false, Ordering::SeqCst) {
            Ok(StopOutcome::Exited(Some(0)))
        } else {
            Ok(StopOutcome::AlreadyExited)
        }
    }

    async fn kill(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn output(&self) -> CapturedOutput {
        CapturedOutput::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

//! Mock pool bridges

use aidb_core::{Error, Result};
use aidb_session::{Bridge, BridgeFactory};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct MockBridge {
    id: String,
    project_path: PathBuf,
    port: Option<u16>,
    alive: AtomicBool,
    fail_start: bool,
    fail_stop: bool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl MockBridge {
    pub fn new(id: impl Into<String>, project_path: &Path) -> Self {
        Self {
            id: id.into(),
            project_path: project_path.to_path_buf(),
            port: None,
            alive: AtomicBool::new(false),
            fail_start: false,
            fail_stop: false,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stop_calls() > 0
    }

    /// Serve DAP on `127.0.0.1:<port>` while alive
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Simulate the bridge process dying
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn id(&self) -> &str {
        &self.id
    }

    fn project_path(&self) -> &Path {
        &self.project_path
    }

    async fn start(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(Error::Process(format!("{} failed to start", self.id)));
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(Error::Process(format!("{} did not stop", self.id)));
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn dap_endpoint(&self) -> Option<(String, u16)> {
        let port = self.port?;
        self.alive
            .load(Ordering::SeqCst)
            .then(|| ("127.0.0.1".to_string(), port))
    }
}

const FIRST_BRIDGE_PORT: u16 = 48000;

/// Creates [`MockBridge`]s with ids `bridge-mock-1`, `bridge-mock-2`, ...
/// serving on ports 48001, 48002, ...
#[derive(Default)]
pub struct MockBridgeFactory {
    created: Mutex<Vec<Arc<MockBridge>>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl MockBridgeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridges created from now on fail to start
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Bridges created from now on fail to stop
    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<MockBridge>> {
        lock(&self.created).clone()
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }

    /// Most recent bridge created for `path` (compared after normalization)
    pub fn bridge_for(&self, path: &Path) -> Option<Arc<MockBridge>> {
        let wanted = aidb_session::normalize_project_path(path);
        lock(&self.created)
            .iter()
            .rev()
            .find(|b| b.project_path == wanted)
            .cloned()
    }
}

#[async_trait]
impl BridgeFactory for MockBridgeFactory {
    async fn create(&self, project_path: &Path, _project_name: &str) -> Result<Arc<dyn Bridge>> {
        let mut created = lock(&self.created);
        let n = created.len() + 1;
        let port = FIRST_BRIDGE_PORT.saturating_add(u16::try_from(n).unwrap_or(u16::MAX));
        let mut bridge = MockBridge::new(format!("bridge-mock-{}", n), project_path).with_port(port);
        bridge.fail_start = self.fail_start.load(Ordering::SeqCst);
        bridge.fail_stop = self.fail_stop.load(Ordering::SeqCst);
        let bridge = Arc::new(bridge);
        created.push(bridge.clone());
        Ok(bridge)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

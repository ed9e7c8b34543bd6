//! Pool bridge backed by a supervised subprocess.
//!
//! The bridge command gets a leased port through `{port}` and is expected to
//! serve DAP there; sessions for the project connect to it instead of
//! launching their own adapter.

use super::{Bridge, BridgeFactory};
use aidb_config::PoolConfig;
use aidb_core::{Error, Result};
use aidb_dap::{LogResult, ManagedProcess, PortAllocator, PortLease, ProcessHandle, ProcessManager, ProcessSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const PROJECT_PLACEHOLDER: &str = "{project}";
const NAME_PLACEHOLDER: &str = "{name}";
const PORT_PLACEHOLDER: &str = "{port}";
const BRIDGE_HOST: &str = "127.0.0.1";

#[derive(Debug)]
struct Running {
    process: Arc<ManagedProcess>,
    lease: PortLease,
}

#[derive(Debug)]
pub struct ProcessBridge {
    id: String,
    project_path: PathBuf,
    /// Program followed by its arguments; `{port}` is filled in on start
    command: Vec<String>,
    processes: ProcessManager,
    ports: Arc<PortAllocator>,
    stop_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl ProcessBridge {
    pub fn new(
        project_path: &Path,
        project_name: &str,
        template: &[String],
        processes: ProcessManager,
        ports: Arc<PortAllocator>,
        stop_timeout: Duration,
    ) -> Self {
        let project = project_path.to_string_lossy();
        let command = template
            .iter()
            .map(|arg| {
                arg.replace(PROJECT_PLACEHOLDER, &project)
                    .replace(NAME_PLACEHOLDER, project_name)
            })
            .collect();
        Self {
            id: format!("bridge-{}", uuid::Uuid::new_v4()),
            project_path: project_path.to_path_buf(),
            command,
            processes,
            ports,
            stop_timeout,
            running: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn command_for(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.command
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }
}

#[async_trait]
impl Bridge for ProcessBridge {
    fn id(&self) -> &str {
        &self.id
    }

    fn project_path(&self) -> &Path {
        &self.project_path
    }

    async fn start(&self) -> Result<()> {
        let mut slot = self.running.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        if self.command.is_empty() {
            return Err(Error::Config("pool.bridge_command is empty".to_string()));
        }

        let lease = self.ports.allocate_async().await?;
        let command = self.command_for(lease.port());
        let Some((program, args)) = command.split_first() else {
            return Err(Error::Config("pool.bridge_command is empty".to_string()));
        };
        let spec = ProcessSpec::new(program.clone(), self.id.clone())
            .args(args.iter().cloned())
            .cwd(self.project_path.clone());
        let process = match self.processes.start(spec) {
            Ok(process) => process,
            Err(e) => {
                lease.release_async().await.warn_ok("Releasing bridge port");
                return Err(e.into());
            }
        };
        info!(bridge = %self.id, pid = ?process.pid(), port = lease.port(), "Bridge process started");
        *slot = Some(Running { process, lease });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let outcome = running.process.stop(self.stop_timeout).await;
        running
            .lease
            .release_async()
            .await
            .warn_ok("Releasing bridge port");
        debug!(bridge = %self.id, outcome = ?outcome.as_ref().ok(), "Bridge process stopped");
        outcome.map(|_| ()).map_err(Into::into)
    }

    async fn is_alive(&self) -> bool {
        let process = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.process.clone());
        match process {
            Some(process) => process.is_running().await,
            None => false,
        }
    }

    async fn dap_endpoint(&self) -> Option<(String, u16)> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| (BRIDGE_HOST.to_string(), running.lease.port()))
    }
}

/// Creates [`ProcessBridge`]s from `pool.bridge_command`
pub struct ProcessBridgeFactory {
    template: Vec<String>,
    processes: ProcessManager,
    ports: Arc<PortAllocator>,
    stop_timeout: Duration,
}

impl ProcessBridgeFactory {
    /// `None` when no bridge command is configured
    pub fn from_config(config: &PoolConfig, processes: ProcessManager, ports: Arc<PortAllocator>) -> Option<Self> {
        let template = config.bridge_command.clone().filter(|c| !c.is_empty())?;
        Some(Self {
            template,
            processes,
            ports,
            stop_timeout: config.bridge_stop_timeout(),
        })
    }
}

#[async_trait]
impl BridgeFactory for ProcessBridgeFactory {
    async fn create(&self, project_path: &Path, project_name: &str) -> Result<Arc<dyn Bridge>> {
        Ok(Arc::new(ProcessBridge::new(
            project_path,
            project_name,
            &self.template,
            self.processes.clone(),
            self.ports.clone(),
            self.stop_timeout,
        )))
    }
}

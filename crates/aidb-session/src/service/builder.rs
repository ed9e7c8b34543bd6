//! DebugServiceBuilder for constructing DebugService instances

use super::{DebugService, ServiceInner};
use crate::child::{ChildRequest, ChildSessionManager};
use crate::pool::{BridgeFactory, ProcessBridgeFactory, ProjectPool};
use crate::registry::SessionRegistry;
use crate::session::{LifecycleNotice, SessionContext};
use aidb_config::Config;
use aidb_core::{Error, Result};
use aidb_dap::{
    AdapterLauncher, PortAllocator, ProcessAdapterLauncher, ProcessManager, ProcessScanner,
    SystemProcessScanner,
};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Builder for DebugService
///
/// # Example
/// ```ignore
/// let service = DebugService::builder(config)
///     .launcher(launcher)
///     .scanner(scanner)
///     .build()?;
/// ```
pub struct DebugServiceBuilder {
    config: Config,
    launcher: Option<Arc<dyn AdapterLauncher>>,
    scanner: Option<Arc<dyn ProcessScanner>>,
    bridge_factory: Option<Arc<dyn BridgeFactory>>,
    processes: Option<ProcessManager>,
}

impl DebugServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            launcher: None,
            scanner: None,
            bridge_factory: None,
            processes: None,
        }
    }

    /// Set the adapter launcher
    ///
    /// If not set, adapters are started as subprocesses on ports leased
    /// from the registry named in `config.ports`.
    pub fn launcher(mut self, launcher: Arc<dyn AdapterLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Set the process scanner used by orphan cleanup
    ///
    /// If not set, defaults to SystemProcessScanner.
    pub fn scanner(mut self, scanner: Arc<dyn ProcessScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Set the factory for project pool bridges
    ///
    /// If not set, a ProcessBridgeFactory is used when `pool.bridge_command`
    /// is configured; otherwise there is no pool.
    pub fn bridge_factory(mut self, factory: Arc<dyn BridgeFactory>) -> Self {
        self.bridge_factory = Some(factory);
        self
    }

    pub fn process_manager(mut self, processes: ProcessManager) -> Self {
        self.processes = Some(processes);
        self
    }

    /// Build the DebugService. Spawns its background tasks, so this must
    /// run inside a Tokio runtime.
    pub fn build(self) -> Result<DebugService> {
        let errors = self.config.validation_errors();
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }
        let config = self.config;

        let processes = self
            .processes
            .unwrap_or_else(|| ProcessManager::new(config.process.clone()));
        let mut ports = None;
        let launcher: Arc<dyn AdapterLauncher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(ProcessAdapterLauncher::new(
                shared_ports(&mut ports, &config)?,
                processes.clone(),
                config.session.clone(),
            )),
        };
        let scanner = self
            .scanner
            .unwrap_or_else(|| Arc::new(SystemProcessScanner::new(config.process.stop_timeout())));
        let bridge_factory = match self.bridge_factory {
            Some(factory) => Some(factory),
            None if config.pool.bridge_command.is_some() => {
                let allocator = shared_ports(&mut ports, &config)?;
                ProcessBridgeFactory::from_config(&config.pool, processes.clone(), allocator)
                    .map(|f| Arc::new(f) as Arc<dyn BridgeFactory>)
            }
            None => None,
        };
        let pool = bridge_factory.map(|factory| ProjectPool::new(factory, config.pool.capacity));

        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let (child_tx, child_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext::new(config.session.clone(), launcher)
            .with_processes(processes)
            .with_lifecycle(lifecycle_tx)
            .with_child_requests(child_tx);

        let registry = Arc::new(SessionRegistry::new(config.session.max_sessions));
        let children = ChildSessionManager::new(registry.clone(), ctx.clone());
        let inner = Arc::new(ServiceInner {
            config,
            registry,
            pool,
            scanner,
            ctx,
            children,
        });

        let tasks = vec![
            tokio::spawn(watch_lifecycle(Arc::downgrade(&inner), lifecycle_rx)),
            tokio::spawn(serve_child_requests(Arc::downgrade(&inner), child_rx)),
        ];
        info!(
            max_sessions = inner.config.session.max_sessions,
            pool = inner.pool.is_some(),
            "Debug service ready"
        );
        Ok(DebugService { inner, tasks })
    }
}

/// One registry handle for the adapter launcher and the pool bridges
fn shared_ports(slot: &mut Option<Arc<PortAllocator>>, config: &Config) -> Result<Arc<PortAllocator>> {
    if let Some(ports) = slot {
        return Ok(ports.clone());
    }
    let ports = PortAllocator::open(&config.ports)?;
    *slot = Some(ports.clone());
    Ok(ports)
}

/// Tear down sessions that ended on their own (adapter terminated,
/// debuggee exited, connection lost)
async fn watch_lifecycle(inner: Weak<ServiceInner>, mut rx: mpsc::UnboundedReceiver<LifecycleNotice>) {
    while let Some(notice) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.registry.contains(&notice.session_id).await {
            continue;
        }
        debug!(session = %notice.session_id, status = %notice.status, "Session ended, cleaning up");
        tokio::spawn(async move {
            if let Err(e) = inner.stop_tree(&notice.session_id).await {
                warn!(session = %notice.session_id, "Cleanup of ended session failed: {}", e);
            }
        });
    }
}

async fn serve_child_requests(inner: Weak<ServiceInner>, mut rx: mpsc::UnboundedReceiver<ChildRequest>) {
    while let Some(request) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            let parent = request.parent_id.clone();
            if let Err(e) = inner
                .children
                .create_child_session(&parent, request.request)
                .await
            {
                warn!(parent = %parent, "startDebugging failed: {}", e);
            }
        });
    }
}

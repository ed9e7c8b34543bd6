use super::connection::resolve_host;
use super::spec::{substitute_port, AdapterEndpoint, AdapterSpec};
use crate::ext::LogResult;
use crate::ports::{PortAllocator, PortLease};
use crate::process::{ProcessHandle, ProcessManager, ProcessSpec};
use crate::transport::{StreamTransport, Transport};
use crate::{Error, Result};
use aidb_config::{AdapterCommandConfig, AdapterTransport, SessionConfig, LOCALHOST_IPV4};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Lines of adapter stderr quoted in a launch failure
const STDERR_TAIL_LINES: usize = 10;

/// Everything a session owns for one adapter connection
pub struct LaunchedAdapter {
    pub transport: Arc<dyn Transport>,
    /// `None` for connect-only adapters
    pub process: Option<Arc<dyn ProcessHandle>>,
    pub lease: Option<PortLease>,
    /// Where child sessions can reach the same adapter, if over TCP
    pub tcp_endpoint: Option<(String, u16)>,
}

impl std::fmt::Debug for LaunchedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedAdapter")
            .field("endpoint", &self.transport.endpoint())
            .field("process", &self.process.as_ref().and_then(|p| p.pid()))
            .field("port", &self.lease.as_ref().map(|l| l.port()))
            .finish()
    }
}

#[async_trait]
pub trait AdapterLauncher: Send + Sync {
    /// Start (or reach) the adapter and return a connected transport.
    /// `tag` marks any spawned process for orphan cleanup.
    async fn launch(&self, spec: &AdapterSpec, tag: &str) -> Result<LaunchedAdapter>;
}

/// Launches adapters as tagged subprocesses on leased ports
pub struct ProcessAdapterLauncher {
    ports: Arc<PortAllocator>,
    processes: ProcessManager,
    session: SessionConfig,
}

impl ProcessAdapterLauncher {
    pub fn new(ports: Arc<PortAllocator>, processes: ProcessManager, session: SessionConfig) -> Self {
        Self {
            ports,
            processes,
            session,
        }
    }

    async fn connect_only(&self, host: &str, port: u16) -> Result<LaunchedAdapter> {
        let transport = StreamTransport::tcp(resolve_host(host), port, self.session.clone());
        transport.connect().await?;
        Ok(LaunchedAdapter {
            transport: Arc::new(transport),
            process: None,
            lease: None,
            tcp_endpoint: Some((host.to_string(), port)),
        })
    }

    async fn launch_tcp(
        &self,
        spec: &AdapterSpec,
        command: &AdapterCommandConfig,
        tag: &str,
    ) -> Result<LaunchedAdapter> {
        let lease = self.ports.allocate_async().await?;
        let port = lease.port();

        let process = self.processes.start(self.process_spec(spec, command, tag, Some(port)))?;
        let transport = StreamTransport::tcp(LOCALHOST_IPV4, port, self.session.clone());

        if let Err(e) = transport.connect().await {
            let stderr = process.output().stderr;
            let tail = stderr[stderr.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            process
                .stop(self.processes.stop_timeout())
                .await
                .warn_ok("Stopping adapter after failed connect");
            lease.release_async().await.warn_ok("Releasing port after failed connect");
            return Err(if tail.is_empty() {
                e
            } else {
                Error::Communication(format!("{} (adapter stderr: {})", e, tail))
            });
        }

        info!(port, pid = ?process.pid(), "Adapter connected");
        Ok(LaunchedAdapter {
            transport: Arc::new(transport),
            process: Some(process),
            lease: Some(lease),
            tcp_endpoint: Some((LOCALHOST_IPV4.to_string(), port)),
        })
    }

    fn launch_stdio(
        &self,
        spec: &AdapterSpec,
        command: &AdapterCommandConfig,
        tag: &str,
    ) -> Result<LaunchedAdapter> {
        let process = self
            .processes
            .start(self.process_spec(spec, command, tag, None).dap_stdio())?;
        let (stdout, stdin) = process
            .take_dap_stdio()
            .ok_or_else(|| Error::Process("adapter stdio already taken".to_string()))?;
        let endpoint = format!("stdio:{}", process.pid().unwrap_or_default());
        Ok(LaunchedAdapter {
            transport: Arc::new(StreamTransport::from_streams(stdout, stdin, endpoint)),
            process: Some(process),
            lease: None,
            tcp_endpoint: None,
        })
    }

    fn process_spec(
        &self,
        spec: &AdapterSpec,
        command: &AdapterCommandConfig,
        tag: &str,
        port: Option<u16>,
    ) -> ProcessSpec {
        let args = match port {
            Some(port) => substitute_port(&command.args, port),
            None => command.args.clone(),
        };
        let mut process = ProcessSpec::new(&command.command, tag).args(args);
        process.env.extend(command.env.clone());
        process.cwd = spec.cwd.clone();
        process
    }
}

#[async_trait]
impl AdapterLauncher for ProcessAdapterLauncher {
    #[instrument(skip(self, spec), fields(adapter = %spec.adapter_id))]
    async fn launch(&self, spec: &AdapterSpec, tag: &str) -> Result<LaunchedAdapter> {
        let result = match &spec.endpoint {
            AdapterEndpoint::Connect { host, port } => self.connect_only(host, *port).await,
            AdapterEndpoint::Launch(command) => match command.transport {
                AdapterTransport::Tcp => self.launch_tcp(spec, command, tag).await,
                AdapterTransport::Stdio => self.launch_stdio(spec, command, tag),
            },
        };
        result.inspect_err(|e| warn!("Adapter launch failed: {}", e))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::Incoming;
    use crate::{Event, ProtocolMessage};
    use aidb_config::{PortConfig, ProcessConfig};

    fn launcher(dir: &std::path::Path) -> ProcessAdapterLauncher {
        let ports = PortAllocator::open_at(dir.join("ports.json"), &PortConfig::default()).unwrap();
        let session = SessionConfig {
            max_connection_refused_attempts: 3,
            retry_interval_ms: 10,
            max_retry_interval_ms: 20,
            ..SessionConfig::default()
        };
        ProcessAdapterLauncher::new(ports, ProcessManager::new(ProcessConfig::default()), session)
    }

    #[tokio::test]
    async fn test_stdio_adapter_speaks_over_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path());
        // `cat` echoes every frame back
        let spec = AdapterSpec::launch(AdapterCommandConfig::new("echo", "cat").stdio());
        let adapter = launcher.launch(&spec, "stdio-test").await.unwrap();
        assert!(adapter.lease.is_none());
        assert!(adapter.tcp_endpoint.is_none());

        let msg = ProtocolMessage::Event(Event::new(1, "initialized"));
        adapter.transport.send(&msg).await.unwrap();
        match adapter.transport.receive().await.unwrap() {
            Incoming::Message(echoed) => assert_eq!(echoed, msg),
            other => panic!("unexpected {:?}", other),
        }
        adapter.process.unwrap().kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_releases_port_and_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path());
        // Never listens on {port}
        let spec = AdapterSpec::launch(
            AdapterCommandConfig::new("dummy", "sh")
                .arg("-c")
                .arg("echo no listener on {port} >&2; sleep 30"),
        );
        let err = launcher.launch(&spec, "tcp-test").await.unwrap_err();
        assert!(matches!(err, Error::Communication(_)));
        assert!(launcher.ports.leases().unwrap().is_empty());
    }
}

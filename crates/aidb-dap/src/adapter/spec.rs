//! How to reach a debug adapter

use aidb_config::{AdapterCommandConfig, AdapterTransport};
use std::path::PathBuf;

/// Placeholder in adapter args replaced by the leased port
pub const PORT_PLACEHOLDER: &str = "{port}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEndpoint {
    /// Start the adapter as a subprocess
    Launch(AdapterCommandConfig),
    /// Connect to an adapter that is already listening
    Connect { host: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSpec {
    /// Sent as `adapterID` in `initialize`
    pub adapter_id: String,
    pub endpoint: AdapterEndpoint,
    pub cwd: Option<PathBuf>,
}

impl AdapterSpec {
    pub fn launch(command: AdapterCommandConfig) -> Self {
        Self {
            adapter_id: command.adapter_id.clone(),
            endpoint: AdapterEndpoint::Launch(command),
            cwd: None,
        }
    }

    pub fn connect(adapter_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            endpoint: AdapterEndpoint::Connect {
                host: host.into(),
                port,
            },
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// True when launching needs a leased port
    pub fn needs_port(&self) -> bool {
        matches!(
            &self.endpoint,
            AdapterEndpoint::Launch(cmd) if cmd.transport == AdapterTransport::Tcp
        )
    }
}

/// Replace `{port}` in every argument
pub fn substitute_port(args: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    args.iter()
        .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_port_inside_argument() {
        let args = vec![
            "-m".to_string(),
            "debugpy.adapter".to_string(),
            "--host=127.0.0.1:{port}".to_string(),
        ];
        assert_eq!(
            substitute_port(&args, 42017),
            vec!["-m", "debugpy.adapter", "--host=127.0.0.1:42017"]
        );
    }

    #[test]
    fn test_needs_port() {
        let tcp = AdapterCommandConfig::new("debugpy", "python").arg("{port}");
        assert!(AdapterSpec::launch(tcp.clone()).needs_port());
        assert!(!AdapterSpec::launch(tcp.stdio()).needs_port());
        assert!(!AdapterSpec::connect("pwa-node", "127.0.0.1", 9229).needs_port());
    }
}

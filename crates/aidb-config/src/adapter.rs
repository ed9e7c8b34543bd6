//! Adapter command-line configuration
//!
//! aidb does not ship a per-language adapter table; each language's adapter
//! command is supplied here by the embedding application or config file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How aidb talks DAP to an adapter process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterTransport {
    /// Adapter listens on an allocated TCP port (`{port}` in args)
    #[default]
    Tcp,
    /// Adapter speaks DAP over its stdin/stdout
    Stdio,
}

/// Command line used to start a debug adapter.
///
/// `{port}` in `args` is replaced with the allocated port for TCP adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCommandConfig {
    /// Value sent as `adapterID` in the initialize request
    pub adapter_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub transport: AdapterTransport,
}

impl AdapterCommandConfig {
    pub fn new(adapter_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            transport: AdapterTransport::Tcp,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdio(mut self) -> Self {
        self.transport = AdapterTransport::Stdio;
        self
    }

    pub(crate) fn validate(&self, language: &str, errors: &mut Vec<String>) {
        if self.command.trim().is_empty() {
            errors.push(format!("adapters.{}.command must not be empty", language));
        }
        if self.adapter_id.trim().is_empty() {
            errors.push(format!("adapters.{}.adapter_id must not be empty", language));
        }
        if self.transport == AdapterTransport::Tcp && !self.args.iter().any(|a| a.contains("{port}"))
        {
            errors.push(format!(
                "adapters.{}: tcp adapters need a {{port}} placeholder in args",
                language
            ));
        }
    }
}

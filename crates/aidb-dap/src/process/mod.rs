//! Adapter and debuggee subprocess supervision

mod manager;
pub mod output;
pub mod signal;

pub use manager::{ManagedProcess, ProcessManager};
pub use output::{CapturedOutput, OutputBuffer, SharedOutput};

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// What happens to the child's stdin/stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// stdin closed, stdout and stderr captured
    #[default]
    Capture,
    /// stdin/stdout piped and handed to a DAP transport; stderr captured
    Dap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Variables to remove from the inherited environment
    pub env_remove: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Written to `AIDB_SESSION_TAG` so orphan cleanup can find the process
    pub tag: String,
    pub stdio: StdioMode,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            env_remove: Vec::new(),
            cwd: None,
            tag: tag.into(),
            stdio: StdioMode::Capture,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn dap_stdio(mut self) -> Self {
        self.stdio = StdioMode::Dap;
        self
    }

    /// `command args...` for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after SIGTERM
    Exited(Option<i32>),
    /// Needed SIGKILL
    Killed,
    /// Was already gone when stop was called
    AlreadyExited,
}

/// A supervised subprocess
#[async_trait]
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    fn pid(&self) -> Option<u32>;

    fn tag(&self) -> &str;

    async fn is_running(&self) -> bool;

    /// SIGTERM the process group, wait up to `timeout`, then SIGKILL.
    /// An error means the process may still be alive.
    async fn stop(&self, timeout: Duration) -> Result<StopOutcome>;

    async fn kill(&self) -> Result<()>;

    fn output(&self) -> CapturedOutput;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = ProcessSpec::new("python", "sess-1")
            .args(["-m", "debugpy.adapter", "--port", "42001"])
            .env("PYTHONUNBUFFERED", "1")
            .cwd("/work");
        assert_eq!(spec.command_line(), "python -m debugpy.adapter --port 42001");
        assert_eq!(spec.stdio, StdioMode::Capture);
        assert_eq!(spec.env["PYTHONUNBUFFERED"], "1");
        assert_eq!(spec.clone().dap_stdio().stdio, StdioMode::Dap);
    }
}

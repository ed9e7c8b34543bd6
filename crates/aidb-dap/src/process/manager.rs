use super::output::{CapturedOutput, SharedOutput};
use super::{signal, ProcessHandle, ProcessSpec, StdioMode, StopOutcome};
use crate::{Error, Result};
use aidb_config::{ProcessConfig, ENV_MANAGED_MARKER, ENV_SESSION_TAG};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// How long to wait for the kernel to reap a SIGKILLed process
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts subprocesses in their own process group, tagged for orphan
/// cleanup.
#[derive(Debug, Clone, Default)]
pub struct ProcessManager {
    config: ProcessConfig,
}

impl ProcessManager {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    pub fn stop_timeout(&self) -> Duration {
        self.config.stop_timeout()
    }

    pub fn start(&self, spec: ProcessSpec) -> Result<Arc<ManagedProcess>> {
        let command_line = spec.command_line();
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .env(ENV_SESSION_TAG, &spec.tag)
            .env(ENV_MANAGED_MARKER, "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        match spec.stdio {
            StdioMode::Capture => cmd.stdin(Stdio::null()),
            StdioMode::Dap => cmd.stdin(Stdio::piped()),
        };
        // Own group, so stop() reaches grandchildren the adapter spawns
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            Error::Process(format!("failed to start '{}': {}", command_line, e))
        })?;
        let pid = child.id();
        info!(?pid, tag = %spec.tag, "Started process: {}", command_line);

        let limit = self.config.output_buffer_bytes;
        let stdout_buf = SharedOutput::new(limit);
        let stderr_buf = SharedOutput::new(limit);
        if let Some(stderr) = child.stderr.take() {
            stderr_buf.spawn_capture(stderr, "stderr", pid);
        }

        let dap_stdio = match spec.stdio {
            StdioMode::Capture => {
                if let Some(stdout) = child.stdout.take() {
                    stdout_buf.spawn_capture(stdout, "stdout", pid);
                }
                None
            }
            StdioMode::Dap => match (child.stdout.take(), child.stdin.take()) {
                (Some(stdout), Some(stdin)) => Some((stdout, stdin)),
                _ => {
                    return Err(Error::Process(format!(
                        "'{}' started without stdio pipes",
                        command_line
                    )))
                }
            },
        };

        Ok(Arc::new(ManagedProcess {
            pid,
            tag: spec.tag,
            command_line,
            child: tokio::sync::Mutex::new(child),
            stdout: stdout_buf,
            stderr: stderr_buf,
            dap_stdio: Mutex::new(dap_stdio),
        }))
    }
}

#[derive(Debug)]
pub struct ManagedProcess {
    pid: Option<u32>,
    tag: String,
    command_line: String,
    child: tokio::sync::Mutex<Child>,
    stdout: SharedOutput,
    stderr: SharedOutput,
    dap_stdio: Mutex<Option<(ChildStdout, ChildStdin)>>,
}

impl ManagedProcess {
    /// The child's stdout/stdin for a DAP transport. Only the first call
    /// gets them.
    pub fn take_dap_stdio(&self) -> Option<(ChildStdout, ChildStdin)> {
        self.dap_stdio
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    #[cfg(unix)]
    async fn terminate(&self, child: &mut Child, pid: u32, timeout: Duration) -> Result<StopOutcome> {
        signal::terminate_group(pid)?;
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, ?status, "Process exited after SIGTERM");
                Ok(StopOutcome::Exited(status.code()))
            }
            Ok(Err(e)) => Err(Error::Process(format!("wait for {} failed: {}", pid, e))),
            Err(_) => {
                warn!(pid, ?timeout, "Process ignored SIGTERM, sending SIGKILL");
                signal::kill_group(pid)?;
                match tokio::time::timeout(KILL_REAP_TIMEOUT, child.wait()).await {
                    Ok(Ok(_)) => Ok(StopOutcome::Killed),
                    Ok(Err(e)) => Err(Error::Process(format!("wait for {} failed: {}", pid, e))),
                    Err(_) => Err(Error::Process(format!("process {} survived SIGKILL", pid))),
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&self, child: &mut Child, pid: u32, _timeout: Duration) -> Result<StopOutcome> {
        child
            .kill()
            .await
            .map_err(|e| Error::Process(format!("kill {} failed: {}", pid, e)))?;
        Ok(StopOutcome::Killed)
    }
}

#[async_trait]
impl ProcessHandle for ManagedProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    async fn is_running(&self) -> bool {
        match self.child.try_lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            // stop() in progress
            Err(_) => self.pid.is_some_and(signal::is_pid_alive),
        }
    }

    async fn stop(&self, timeout: Duration) -> Result<StopOutcome> {
        let mut child = self.child.lock().await;
        let exited = child
            .try_wait()
            .map_err(|e| Error::Process(format!("status check failed: {}", e)))?;
        let (None, Some(pid)) = (exited, self.pid) else {
            return Ok(StopOutcome::AlreadyExited);
        };
        let outcome = self.terminate(&mut child, pid, timeout).await?;
        info!(pid, tag = %self.tag, ?outcome, "Process stopped");
        Ok(outcome)
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal::kill_group(pid)?;
        }
        child
            .kill()
            .await
            .map_err(|e| Error::Process(format!("kill failed: {}", e)))
    }

    fn output(&self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout.lines(),
            stderr: self.stderr.lines(),
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // kill_on_drop only reaches the group leader
        #[cfg(unix)]
        if let (Ok(mut child), Some(pid)) = (self.child.try_lock(), self.pid) {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = signal::kill_group(pid);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn manager() -> ProcessManager {
        ProcessManager::new(ProcessConfig::default())
    }

    async fn wait_for_output(process: &ManagedProcess, needle: &str) -> bool {
        for _ in 0..100 {
            if process.output().stdout.iter().any(|l| l.contains(needle)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_tag_markers_in_environment() {
        let process = manager()
            .start(
                ProcessSpec::new("sh", "tag-123")
                    .args(["-c", "echo tag=$AIDB_SESSION_TAG managed=$AIDB_MANAGED; sleep 5"]),
            )
            .unwrap();
        assert!(wait_for_output(&process, "tag=tag-123 managed=1").await);
        assert!(process.is_running().await);
        process.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_graceful() {
        let process = manager()
            .start(ProcessSpec::new("sleep", "t").args(["30"]))
            .unwrap();
        let outcome = process.stop(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Exited(_)));
        assert!(!process.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let process = manager()
            .start(
                ProcessSpec::new("sh", "t")
                    .args(["-c", "trap '' TERM; echo ready; while true; do sleep 1; done"]),
            )
            .unwrap();
        assert!(wait_for_output(&process, "ready").await);
        let outcome = process.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
    }

    #[tokio::test]
    async fn test_stop_after_exit() {
        let process = manager().start(ProcessSpec::new("true", "t")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            process.stop(Duration::from_secs(1)).await.unwrap(),
            StopOutcome::AlreadyExited
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_process_error() {
        let err = manager()
            .start(ProcessSpec::new("/nonexistent/aidb-adapter", "t"))
            .unwrap_err();
        assert!(matches!(err, Error::Process(_)));
    }

    #[tokio::test]
    async fn test_dap_stdio_taken_once() {
        let process = manager()
            .start(ProcessSpec::new("cat", "t").dap_stdio())
            .unwrap();
        assert!(process.take_dap_stdio().is_some());
        assert!(process.take_dap_stdio().is_none());
        process.kill().await.unwrap();
    }
}

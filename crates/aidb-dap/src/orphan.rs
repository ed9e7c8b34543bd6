//! Finding and terminating tagged subprocesses nobody owns anymore.
//!
//! Every process started through [`ProcessManager`](crate::ProcessManager)
//! carries `AIDB_MANAGED=1` and `AIDB_SESSION_TAG=<id>` in its environment.
//! A crash of the owning aidb process leaves those behind; this module scans
//! for them and stops the ones whose tag is not live anymore.

use crate::process::signal::{is_pid_alive, kill_pid, terminate_pid};
use crate::{Error, Result};
use aidb_config::{ENV_MANAGED_MARKER, ENV_SESSION_TAG};
use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedProcess {
    pub pid: u32,
    pub tag: String,
    pub age: Duration,
}

#[async_trait]
pub trait ProcessScanner: Send + Sync {
    /// All live processes carrying the aidb markers
    async fn scan_tagged(&self) -> Result<Vec<TaggedProcess>>;

    /// Stop one process. `Err` means it may still be running.
    async fn terminate(&self, process: &TaggedProcess) -> Result<()>;
}

/// Scans the real process table through `sysinfo`
#[derive(Debug, Clone)]
pub struct SystemProcessScanner {
    stop_timeout: Duration,
}

impl SystemProcessScanner {
    pub fn new(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }
}

/// Extract the session tag from an environment block
fn session_tag(environ: &[OsString]) -> Option<String> {
    let mut managed = false;
    let mut tag = None;
    for entry in environ {
        let entry = entry.to_string_lossy();
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if key == ENV_MANAGED_MARKER {
            managed = value == "1";
        } else if key == ENV_SESSION_TAG {
            tag = Some(value.to_string());
        }
    }
    tag.filter(|t| managed && !t.is_empty())
}

/// Gone or a zombie waiting for its parent to reap it
fn has_exited(pid: u32) -> bool {
    if !is_pid_alive(pid) {
        return true;
    }
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(pid)
        .map_or(true, |p| p.status() == ProcessStatus::Zombie)
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !has_exited(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    true
}

#[async_trait]
impl ProcessScanner for SystemProcessScanner {
    async fn scan_tagged(&self) -> Result<Vec<TaggedProcess>> {
        tokio::task::spawn_blocking(|| {
            let own_pid = std::process::id();
            let mut system = System::new();
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_environ(UpdateKind::Always),
            );
            system
                .processes()
                .iter()
                .filter(|(_, process)| process.thread_kind().is_none())
                .filter_map(|(pid, process)| {
                    let pid = pid.as_u32();
                    if pid == own_pid {
                        return None;
                    }
                    session_tag(process.environ()).map(|tag| TaggedProcess {
                        pid,
                        tag,
                        age: Duration::from_secs(process.run_time()),
                    })
                })
                .collect()
        })
        .await
        .map_err(|e| Error::Process(format!("process scan failed: {}", e)))
    }

    async fn terminate(&self, process: &TaggedProcess) -> Result<()> {
        let pid = process.pid;
        if !terminate_pid(pid)? || wait_for_exit(pid, self.stop_timeout).await {
            return Ok(());
        }
        debug!(pid, "Orphan ignored SIGTERM, sending SIGKILL");
        if !kill_pid(pid)? || wait_for_exit(pid, KILL_CONFIRM_TIMEOUT).await {
            return Ok(());
        }
        Err(Error::Process(format!("orphan {} survived SIGKILL", pid)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanCleanupReport {
    pub terminated: usize,
    pub failed: usize,
    /// Tag still owned by a live session or pool entry
    pub skipped_active: usize,
    /// Younger than the age threshold
    pub skipped_young: usize,
}

/// Terminate tagged processes whose tag is not in `active_ids` and that are
/// at least `min_age` old. Failures are counted, never returned.
pub async fn cleanup_orphaned_processes(
    scanner: &dyn ProcessScanner,
    active_ids: &HashSet<String>,
    min_age: Duration,
) -> OrphanCleanupReport {
    let mut report = OrphanCleanupReport::default();
    let tagged = match scanner.scan_tagged().await {
        Ok(tagged) => tagged,
        Err(e) => {
            warn!("Orphan scan failed: {}", e);
            return report;
        }
    };

    for process in tagged {
        if active_ids.contains(&process.tag) {
            report.skipped_active += 1;
            continue;
        }
        if process.age < min_age {
            report.skipped_young += 1;
            continue;
        }
        match scanner.terminate(&process).await {
            Ok(()) => {
                info!(pid = process.pid, tag = %process.tag, "Terminated orphaned process");
                report.terminated += 1;
            }
            Err(e) => {
                warn!(pid = process.pid, tag = %process.tag, "Failed to terminate orphan: {}", e);
                report.failed += 1;
            }
        }
    }

    if report.terminated + report.failed > 0 {
        info!(
            terminated = report.terminated,
            failed = report.failed,
            "Orphan cleanup finished"
        );
    }
    report
}

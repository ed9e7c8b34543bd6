//! Process-group signalling

use crate::{Error, Result};

#[cfg(unix)]
mod imp {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    fn to_pid(pid: u32) -> Result<Pid> {
        i32::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .map(Pid::from_raw)
            .ok_or_else(|| Error::Process(format!("invalid pid {}", pid)))
    }

    /// `Ok(false)` when there is nothing left to signal
    fn deliver(result: nix::Result<()>, what: &str, target: u32) -> Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(Error::Process(format!("{} {} failed: {}", what, target, e))),
        }
    }

    pub fn terminate_group(pgid: u32) -> Result<bool> {
        deliver(killpg(to_pid(pgid)?, Signal::SIGTERM), "SIGTERM group", pgid)
    }

    pub fn kill_group(pgid: u32) -> Result<bool> {
        deliver(killpg(to_pid(pgid)?, Signal::SIGKILL), "SIGKILL group", pgid)
    }

    pub fn terminate_pid(pid: u32) -> Result<bool> {
        deliver(kill(to_pid(pid)?, Signal::SIGTERM), "SIGTERM", pid)
    }

    pub fn kill_pid(pid: u32) -> Result<bool> {
        deliver(kill(to_pid(pid)?, Signal::SIGKILL), "SIGKILL", pid)
    }

    pub fn is_pid_alive(pid: u32) -> bool {
        let Ok(pid) = to_pid(pid) else {
            return false;
        };
        // EPERM: exists but belongs to someone else
        matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    fn unsupported(pid: u32) -> Result<bool> {
        Err(Error::Process(format!(
            "signalling process {} is only supported on unix",
            pid
        )))
    }

    pub fn terminate_group(pgid: u32) -> Result<bool> {
        unsupported(pgid)
    }

    pub fn kill_group(pgid: u32) -> Result<bool> {
        unsupported(pgid)
    }

    pub fn terminate_pid(pid: u32) -> Result<bool> {
        unsupported(pid)
    }

    pub fn kill_pid(pid: u32) -> Result<bool> {
        unsupported(pid)
    }

    pub fn is_pid_alive(pid: u32) -> bool {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(pid).is_some()
    }
}

pub use imp::{is_pid_alive, kill_group, kill_pid, terminate_group, terminate_pid};

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(is_pid_alive(std::process::id()));
        assert!(!is_pid_alive(0));
    }

    #[test]
    fn test_signal_to_missing_group_reports_nothing_sent() {
        // Reaped child: its pid no longer names a process group
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!terminate_group(pid).unwrap());
    }
}

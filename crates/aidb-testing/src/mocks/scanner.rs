//! Mock process table for orphan cleanup

use aidb_dap::{Error, ProcessScanner, Result, TaggedProcess};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Process table held in memory. Terminated processes disappear from later
/// scans.
#[derive(Default, Clone)]
pub struct MockProcessScanner {
    processes: Arc<Mutex<Vec<TaggedProcess>>>,
    stubborn: Arc<Mutex<HashSet<u32>>>,
    terminated: Arc<Mutex<Vec<u32>>>,
}

impl MockProcessScanner {
    pub fn new(processes: Vec<TaggedProcess>) -> Self {
        Self {
            processes: Arc::new(Mutex::new(processes)),
            ..Self::default()
        }
    }

    pub fn add(&self, process: TaggedProcess) {
        lock(&self.processes).push(process);
    }

    /// `terminate` fails for this pid
    pub fn fail_terminate(&self, pid: u32) {
        lock(&self.stubborn).insert(pid);
    }

    pub fn terminated(&self) -> Vec<u32> {
        lock(&self.terminated).clone()
    }

    pub fn remaining(&self) -> Vec<TaggedProcess> {
        lock(&self.processes).clone()
    }
}

#[async_trait]
impl ProcessScanner for MockProcessScanner {
    async fn scan_tagged(&self) -> Result<Vec<TaggedProcess>> {
        Ok(self.remaining())
    }

    async fn terminate(&self, process: &TaggedProcess) -> Result<()> {
        if lock(&self.stubborn).contains(&process.pid) {
            return Err(Error::Process(format!("pid {} survived SIGKILL", process.pid)));
        }
        lock(&self.processes).retain(|p| p.pid != process.pid);
        lock(&self.terminated).push(process.pid);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

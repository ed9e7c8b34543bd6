//! Per-project pool of long-lived language-server bridges.
//!
//! Java debugging needs a JDT language server per project, which takes many
//! seconds to start. The pool keeps up to `capacity` of them warm, keyed by
//! normalized project path, and evicts the least recently used one when a
//! new project needs room.
//!
//! Recency is an access counter rather than a clock: every hit or insert
//! takes the next tick, and the entry with the lowest tick goes first.

mod process_bridge;

pub use process_bridge::{ProcessBridge, ProcessBridgeFactory};

use aidb_core::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

/// A long-lived helper process bound to one project
#[async_trait]
pub trait Bridge: Send + Sync + std::fmt::Debug {
    /// Process tag, so orphan cleanup leaves pooled processes alone
    fn id(&self) -> &str;

    fn project_path(&self) -> &Path;

    async fn start(&self) -> Result<()>;

    /// Stop fully. An error means the bridge may still be running.
    async fn stop(&self) -> Result<()>;

    async fn is_alive(&self) -> bool;

    /// Where the bridge serves DAP while it runs. Sessions for the project
    /// connect here instead of launching their own adapter.
    async fn dap_endpoint(&self) -> Option<(String, u16)>;
}

#[async_trait]
pub trait BridgeFactory: Send + Sync {
    async fn create(&self, project_path: &Path, project_name: &str) -> Result<Arc<dyn Bridge>>;
}

struct PoolEntry {
    bridge: Arc<dyn Bridge>,
    last_access: u64,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<PathBuf, PoolEntry>,
    tick: u64,
}

impl PoolState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn least_recent(&self) -> Option<PathBuf> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(path, _)| path.clone())
    }
}

pub struct ProjectPool {
    factory: Arc<dyn BridgeFactory>,
    capacity: usize,
    /// Lookup, eviction and insertion all happen under this lock
    state: Mutex<PoolState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProjectPool {
    pub fn new(factory: Arc<dyn BridgeFactory>, capacity: usize) -> Self {
        Self {
            factory,
            capacity: capacity.max(1),
            state: Mutex::new(PoolState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The project's bridge, starting one (and evicting the least recently
    /// used) if it is not pooled or has died
    #[instrument(skip(self), fields(project = %project_path.display()))]
    pub async fn get_or_start_bridge(&self, project_path: &Path, project_name: &str) -> Result<Arc<dyn Bridge>> {
        let key = normalize_project_path(project_path);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(entry) = state.entries.get(&key) {
            if entry.bridge.is_alive().await {
                let bridge = entry.bridge.clone();
                let tick = state.next_tick();
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.last_access = tick;
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(bridge = bridge.id(), "Pool hit");
                return Ok(bridge);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(dead) = state.entries.remove(&key) {
            warn!(bridge = dead.bridge.id(), "Pooled bridge died, replacing");
            if let Err(e) = dead.bridge.stop().await {
                debug!(bridge = dead.bridge.id(), "Stopping dead bridge: {}", e);
            }
        }

        while state.entries.len() >= self.capacity {
            let Some(victim) = state.least_recent() else {
                break;
            };
            if let Some(entry) = state.entries.remove(&victim) {
                info!(bridge = entry.bridge.id(), project = %victim.display(), "Evicting least recently used bridge");
                if let Err(e) = entry.bridge.stop().await {
                    warn!(bridge = entry.bridge.id(), "Evicted bridge did not stop cleanly: {}", e);
                }
            }
        }

        let bridge = self.factory.create(&key, project_name).await?;
        if let Err(e) = bridge.start().await {
            if let Err(stop_err) = bridge.stop().await {
                debug!(bridge = bridge.id(), "Cleaning up failed bridge: {}", stop_err);
            }
            return Err(e);
        }

        let tick = state.next_tick();
        state.entries.insert(
            key,
            PoolEntry {
                bridge: bridge.clone(),
                last_access: tick,
            },
        );
        info!(bridge = bridge.id(), pooled = state.entries.len(), "Bridge started");
        Ok(bridge)
    }

    /// Stop every bridge and empty the pool. Stop failures are logged.
    pub async fn shutdown_pool(&self) {
        let mut state = self.state.lock().await;
        let entries: Vec<_> = state.entries.drain().collect();
        for (path, entry) in entries {
            if let Err(e) = entry.bridge.stop().await {
                warn!(bridge = entry.bridge.id(), project = %path.display(), "Bridge did not stop: {}", e);
            }
        }
        info!("Project pool shut down");
    }

    /// Ids of pooled bridges, for orphan cleanup
    pub async fn active_ids(&self) -> HashSet<String> {
        self.state
            .lock()
            .await
            .entries
            .values()
            .map(|e| e.bridge.id().to_string())
            .collect()
    }

    pub async fn contains(&self, project_path: &Path) -> bool {
        self.state
            .lock()
            .await
            .entries
            .contains_key(&normalize_project_path(project_path))
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

/// Pool key for a project path: canonical when the path exists, otherwise
/// lexically cleaned so `a/./b/` and `a/b` still match
pub fn normalize_project_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lexical() {
        let path = Path::new("/no/such/dir/./proj/../proj/");
        assert_eq!(normalize_project_path(path), PathBuf::from("/no/such/dir/proj"));
    }

    #[test]
    fn test_normalize_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let dotted = dir.path().join(".");
        assert_eq!(
            normalize_project_path(&dotted),
            dir.path().canonicalize().unwrap()
        );
    }
}

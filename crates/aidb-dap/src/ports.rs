//! Cross-process port allocation
//!
//! Several aidb processes can share one port range. Leases live in a JSON
//! registry file; every read-modify-write happens under an exclusive
//! advisory lock on that file, and a candidate port is only leased after a
//! real bind on 127.0.0.1 succeeds.
//!
//! ```text
//! {"leases":[{"port":42017,"pid":4711,"holder":"4711-6f1c...","acquired_at":1760000000}]}
//! ```

use crate::process::signal::is_pid_alive;
use crate::{Error, Result};
use aidb_config::PortConfig;
use fs2::FileExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the registry lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockWait {
    /// Retry until `lock_timeout`, then fail
    Bounded,
    /// A single attempt; a busy lock is not an error
    Never,
}

/// One entry in the registry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub port: u16,
    pub pid: u32,
    /// `<pid>-<uuid>`, unique per allocator instance
    pub holder: String,
    /// Unix seconds
    pub acquired_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    leases: Vec<LeaseRecord>,
}

/// True if nothing is bound to `port` on 127.0.0.1 right now
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn registry_error(path: &Path, what: &str, e: impl std::fmt::Display) -> Error {
    Error::PortRegistry(format!("{} {}: {}", what, path.display(), e))
}

#[derive(Debug)]
pub struct PortAllocator {
    path: PathBuf,
    config: PortConfig,
    pid: u32,
    holder: String,
}

impl PortAllocator {
    /// Open the registry named by `config`, creating it if needed, and
    /// sweep leases whose holder process is gone.
    pub fn open(config: &PortConfig) -> Result<Arc<Self>> {
        Self::open_at(config.registry_path(), config)
    }

    pub fn open_at(path: impl Into<PathBuf>, config: &PortConfig) -> Result<Arc<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| registry_error(parent, "create directory", e))?;
        }
        let pid = std::process::id();
        let allocator = Arc::new(Self {
            path,
            config: config.clone(),
            pid,
            holder: format!("{}-{}", pid, uuid::Uuid::new_v4()),
        });
        let swept = allocator.sweep_dead_holders()?;
        if swept > 0 {
            info!(swept, registry = %allocator.path.display(), "Reclaimed leases of dead processes");
        }
        Ok(allocator)
    }

    pub fn registry_path(&self) -> &Path {
        &self.path
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Lease a port from the configured range
    pub fn allocate(self: &Arc<Self>) -> Result<PortLease> {
        self.allocate_in(self.config.range_start, self.config.range_size)
    }

    /// [`allocate`](Self::allocate) on the blocking pool
    pub async fn allocate_async(self: &Arc<Self>) -> Result<PortLease> {
        let allocator = self.clone();
        tokio::task::spawn_blocking(move || allocator.allocate())
            .await
            .map_err(|e| Error::PortRegistry(format!("allocation task failed: {}", e)))?
    }

    /// Lease a port from `range_start .. range_start + range_size`.
    ///
    /// Probing starts at a random offset so concurrent allocators spread
    /// out. Fails with `PortExhausted` once the range is fully leased or
    /// `max_probe_attempts` bind probes have failed.
    pub fn allocate_in(self: &Arc<Self>, range_start: u16, range_size: u16) -> Result<PortLease> {
        let range_end = u32::from(range_start) + u32::from(range_size);
        let exhausted = Error::PortExhausted {
            range_start,
            range_end,
        };
        if range_size == 0 {
            return Err(exhausted);
        }
        let grace = self.config.lease_grace().as_secs();
        let max_probes = self.config.max_probe_attempts;

        let port = self.with_locked_registry(|registry| {
            let now = unix_now();
            registry.leases.retain(|lease| {
                let reclaim =
                    !is_pid_alive(lease.pid) && now.saturating_sub(lease.acquired_at) >= grace;
                if reclaim {
                    debug!(port = lease.port, pid = lease.pid, "Reclaiming dead lease");
                }
                !reclaim
            });

            let leased: HashSet<u16> = registry.leases.iter().map(|l| l.port).collect();
            let in_range = |p: &u16| u32::from(*p) >= u32::from(range_start) && u32::from(*p) < range_end;
            if leased.iter().filter(|p| in_range(p)).count() >= usize::from(range_size) {
                return Ok(None);
            }

            let offset = rand::rng().random_range(0..u32::from(range_size));
            let mut probes = 0u32;
            for i in 0..u32::from(range_size) {
                let candidate = u32::from(range_start) + (offset + i) % u32::from(range_size);
                let Ok(port) = u16::try_from(candidate) else {
                    continue;
                };
                if leased.contains(&port) {
                    continue;
                }
                probes += 1;
                if is_port_available(port) {
                    registry.leases.push(LeaseRecord {
                        port,
                        pid: self.pid,
                        holder: self.holder.clone(),
                        acquired_at: now,
                    });
                    return Ok(Some(port));
                }
                if probes >= max_probes {
                    break;
                }
            }
            Ok(None)
        })?;

        match port {
            Some(port) => {
                debug!(port, holder = %self.holder, "Port leased");
                Ok(PortLease {
                    port,
                    allocator: self.clone(),
                    released: AtomicBool::new(false),
                })
            }
            None => {
                warn!(range_start, range_end, "No free port");
                Err(exhausted)
            }
        }
    }

    /// Drop this allocator's lease on `port`. Returns false if it held none.
    pub fn release(&self, port: u16) -> Result<bool> {
        let removed = self.with_locked_registry(|registry| Ok(self.remove_lease(registry, port)))?;
        if removed {
            debug!(port, "Port released");
        }
        Ok(removed)
    }

    /// Single non-blocking attempt at [`release`](Self::release). `None`
    /// when another process holds the registry lock.
    pub fn try_release(&self, port: u16) -> Result<Option<bool>> {
        let removed = self.with_registry(LockWait::Never, |registry| Ok(self.remove_lease(registry, port)))?;
        if removed == Some(true) {
            debug!(port, "Port released");
        }
        Ok(removed)
    }

    fn remove_lease(&self, registry: &mut Registry, port: u16) -> bool {
        let before = registry.leases.len();
        registry
            .leases
            .retain(|l| !(l.port == port && l.holder == self.holder));
        before != registry.leases.len()
    }

    pub fn leases(&self) -> Result<Vec<LeaseRecord>> {
        self.with_locked_registry(|registry| Ok(registry.leases.clone()))
    }

    /// Remove every lease whose holder pid no longer exists
    pub fn sweep_dead_holders(&self) -> Result<usize> {
        self.with_locked_registry(|registry| {
            let before = registry.leases.len();
            registry.leases.retain(|l| is_pid_alive(l.pid));
            Ok(before - registry.leases.len())
        })
    }

    /// Run `f` on the registry under the exclusive file lock and write the
    /// result back (seek, write, truncate, fsync).
    fn with_locked_registry<T>(&self, f: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        self.with_registry(LockWait::Bounded, f)?
            .ok_or_else(|| registry_error(&self.path, "lock", "lock not acquired"))
    }

    fn with_registry<T>(
        &self,
        wait: LockWait,
        f: impl FnOnce(&mut Registry) -> Result<T>,
    ) -> Result<Option<T>> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| registry_error(&self.path, "open", e))?;
        if !self.lock(&file, wait)? {
            return Ok(None);
        }

        let result = self.read_modify_write(&mut file, f);

        if let Err(e) = FileExt::unlock(&file) {
            debug!("Unlocking {}: {}", self.path.display(), e);
        }
        result.map(Some)
    }

    /// Returns false only for `LockWait::Never` when the lock is busy
    fn lock(&self, file: &File, wait: LockWait) -> Result<bool> {
        let deadline = Instant::now() + self.config.lock_timeout();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(true),
                Err(_) if wait == LockWait::Never => return Ok(false),
                Err(e) if Instant::now() >= deadline => {
                    return Err(registry_error(&self.path, "lock", e));
                }
                Err(_) => std::thread::sleep(LOCK_RETRY_INTERVAL),
            }
        }
    }

    fn read_modify_write<T>(
        &self,
        file: &mut File,
        f: impl FnOnce(&mut Registry) -> Result<T>,
    ) -> Result<T> {
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| registry_error(&self.path, "read", e))?;
        let mut registry = if raw.trim().is_empty() {
            Registry::default()
        } else {
            match serde_json::from_str(&raw) {
                Ok(registry) => registry,
                Err(e) => {
                    self.quarantine(&raw, &e)?;
                    Registry::default()
                }
            }
        };

        let value = f(&mut registry)?;

        let json = serde_json::to_vec(&registry)?;
        overwrite(file, &json).map_err(|e| registry_error(&self.path, "write", e))?;
        Ok(value)
    }

    /// Keep an unreadable registry next to the original before it is
    /// rebuilt. A copy, not a rename: the lock lives on the open inode, and
    /// other processes must keep locking the same file.
    ///
    /// Leases recorded only in the lost contents are not known any more;
    /// the bind probe in `allocate_in` still skips every port an adapter is
    /// already listening on.
    fn quarantine(&self, raw: &str, err: &serde_json::Error) -> Result<PathBuf> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", unix_now()));
        let target = PathBuf::from(name);
        std::fs::write(&target, raw).map_err(|e| registry_error(&target, "quarantine", e))?;
        warn!(
            registry = %self.path.display(),
            quarantined = %target.display(),
            "Corrupt port registry moved aside, rebuilding: {}",
            err
        );
        Ok(target)
    }
}

fn overwrite(file: &mut File, contents: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(contents)?;
    file.set_len(contents.len() as u64)?;
    file.sync_all()
}

/// A leased port. Released on [`release`](PortLease::release) or, best
/// effort, on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    allocator: Arc<PortAllocator>,
    released: AtomicBool,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Release now, waiting for the registry lock. Blocks the thread; from
    /// async code use [`release_async`](Self::release_async).
    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.allocator.release(self.port).map(|_| ())
    }

    /// [`release`](Self::release) on the blocking pool
    pub async fn release_async(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let allocator = self.allocator.clone();
        let port = self.port;
        tokio::task::spawn_blocking(move || allocator.release(port))
            .await
            .map_err(|e| Error::PortRegistry(format!("release task failed: {}", e)))?
            .map(|_| ())
    }
}

impl Drop for PortLease {
    /// One lock attempt. If the lock is busy inside a runtime the release
    /// moves to the blocking pool; outside one it waits here.
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let port = self.port;
        match self.allocator.try_release(port) {
            Ok(Some(_)) => {}
            Ok(None) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let allocator = self.allocator.clone();
                    handle.spawn_blocking(move || {
                        if let Err(e) = allocator.release(port) {
                            warn!(port, "Failed to release port lease: {}", e);
                        }
                    });
                }
                Err(_) => {
                    if let Err(e) = self.allocator.release(port) {
                        warn!(port, "Failed to release port lease: {}", e);
                    }
                }
            },
            Err(e) => warn!(port, "Failed to release port lease: {}", e),
        }
    }
}

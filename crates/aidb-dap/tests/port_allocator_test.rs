//! Port allocation across independent allocator instances sharing one
//! registry file, the way separate aidb processes share `~/.aidb/ports.json`.
//!
//! Run with: cargo test --package aidb-dap --test port_allocator_test

use aidb_config::PortConfig;
use aidb_dap::ports::is_port_available;
use aidb_dap::{Error, PortAllocator};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};

const N: u16 = 6;

fn config() -> PortConfig {
    PortConfig {
        lock_timeout_ms: 10_000,
        ..PortConfig::default()
    }
}

fn free_range(size: u16) -> u16 {
    'outer: for base in (46_000u16..60_000).step_by(53) {
        for port in base..base + size {
            if !is_port_available(port) {
                continue 'outer;
            }
        }
        return base;
    }
    panic!("no free port range for the test");
}

#[test]
fn test_concurrent_allocators_get_distinct_ports() {
    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("ports.json");
    let base = free_range(N);
    let barrier = Arc::new(Barrier::new(usize::from(N)));

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let allocator = PortAllocator::open_at(&registry, &config()).unwrap();
                barrier.wait();
                let lease = allocator.allocate_in(base, N).unwrap();
                (allocator, lease)
            })
        })
        .collect();
    let leased: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let ports: HashSet<u16> = leased.iter().map(|(_, lease)| lease.port()).collect();
    assert_eq!(ports.len(), usize::from(N), "ports were leased twice");
    assert!(ports.iter().all(|p| (base..base + N).contains(p)));

    // Range is full: one more allocation from a fresh instance fails
    let extra = PortAllocator::open_at(&registry, &config()).unwrap();
    let err = extra.allocate_in(base, N).unwrap_err();
    assert!(matches!(err, Error::PortExhausted { .. }));

    // Release one; the next allocation succeeds and reuses it
    let (_, lease) = &leased[0];
    let freed = lease.port();
    lease.release().unwrap();
    let again = extra.allocate_in(base, N).unwrap();
    assert_eq!(again.port(), freed);
}

#[test]
fn test_dropped_lease_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let allocator = PortAllocator::open_at(dir.path().join("ports.json"), &config()).unwrap();
    let base = free_range(1);
    {
        let lease = allocator.allocate_in(base, 1).unwrap();
        assert_eq!(allocator.leases().unwrap().len(), 1);
        assert_eq!(lease.port(), base);
    }
    assert!(allocator.leases().unwrap().is_empty());
}

#[tokio::test]
async fn test_async_allocation_uses_configured_range() {
    let dir = tempfile::tempdir().unwrap();
    let base = free_range(3);
    let config = PortConfig {
        range_start: base,
        range_size: 3,
        registry_path: Some(dir.path().join("ports.json")),
        ..config()
    };
    let allocator = PortAllocator::open(&config).unwrap();
    let lease = allocator.allocate_async().await.unwrap();
    assert!((base..base + 3).contains(&lease.port()));
}

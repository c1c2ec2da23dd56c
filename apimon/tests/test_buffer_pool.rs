use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use apimon::config::MonitorConfig;
use apimon::diagnostics::{MemorySink, Severity};
use apimon::platform::OfflinePlatform;
use apimon::pool::{BufferPool, PoolStats};
use apimon::wide::{wide, WideBuf};
use apimon::Monitor;

#[test]
fn test_threads_never_share_buffers() {
    let sink = Arc::new(MemorySink::new());
    let pool = BufferPool::with_limits(16, 128, sink.clone());

    let ids: Vec<Vec<usize>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let held: Vec<_> = (0..16).map(|_| pool.acquire()).collect();
                    let ids = held.iter().map(|b| b.as_ptr() as usize).collect();
                    assert_eq!(pool.stats(), PoolStats { slots: 16, in_use: 16 });
                    ids
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let distinct: HashSet<usize> = ids.iter().flatten().copied().collect();
    assert_eq!(distinct.len(), 8 * 16);
    assert_eq!(sink.count_at_least(Severity::Warning), 0);
}

#[test]
fn test_slots_are_reused_across_calls() {
    let pool = BufferPool::with_limits(4, 64, Arc::new(MemorySink::new()));
    for _ in 0..100 {
        let mut a = pool.acquire();
        let mut b = pool.acquire();
        a.push_str("first");
        b.push_str("second");
    }
    assert_eq!(pool.stats(), PoolStats { slots: 2, in_use: 0 });
}

#[test]
fn test_exhaustion_reports_once_per_fallback() {
    let sink = Arc::new(MemorySink::new());
    let pool = BufferPool::with_limits(1, 64, sink.clone());
    let _held = pool.acquire();
    for _ in 0..3 {
        let mut extra = pool.acquire();
        assert!(extra.push_str("usable"));
    }
    assert_eq!(sink.count_at_least(Severity::Critical), 3);
    assert_eq!(pool.stats(), PoolStats { slots: 1, in_use: 1 });
}

#[test]
fn test_concurrent_canonicalization() {
    let mut platform = OfflinePlatform::new();
    platform.map_drive('C', r"\Device\HarddiskVolume1").add_path(r"C:\Windows\System32\ntdll.dll");
    let monitor = Monitor::attach(MonitorConfig::default(), platform, Arc::new(MemorySink::new()));

    thread::scope(|scope| {
        for i in 0..8 {
            let monitor = &monitor;
            scope.spawn(move || {
                let raw = wide(&format!(r"\Device\HarddiskVolume1\Windows\System32\ntdll.dll\{i}"));
                let mut out = WideBuf::new();
                for _ in 0..50 {
                    monitor.paths().from_string(Some(raw.as_slice()), &mut out);
                    assert_eq!(out.to_string_lossy(), format!(r"C:\Windows\System32\ntdll.dll\{i}"));
                }
                assert_eq!(monitor.pool().stats().in_use, 0);
                assert!(monitor.pool().reset_thread());
            });
        }
    });
}

//! Observational counters surfaced at the `/stats` endpoint and in log
//! fields. Grounded on `core/redis_input.go`'s `connsCount`/`connsSum`
//! (SPEC_FULL.md "Supplemented features"): connection accounting is
//! per-process and per-source-IP, observational only — nothing here
//! gates behavior.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct Stats {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    live_connections: AtomicI64,
    per_ip: Mutex<HashMap<IpAddr, i64>>,
    pipeline_accepted: AtomicI64,
    pipeline_dropped: AtomicI64,
    size_rejected: AtomicI64,
}

/// RAII guard released when a connection task ends, so `live_connections`
/// and the per-IP count stay in sync without the caller having to remember
/// to decrement on every exit path.
pub struct ConnGuard {
    stats: Stats,
    ip: IpAddr,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.stats.inner.live_connections.fetch_sub(1, Ordering::Relaxed);
        let mut map = self.stats.inner.per_ip.lock().unwrap();
        if let Some(count) = map.get_mut(&self.ip) {
            *count -= 1;
            if *count <= 0 {
                map.remove(&self.ip);
            }
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn connection_opened(&self, ip: IpAddr) -> ConnGuard {
        self.inner.live_connections.fetch_add(1, Ordering::Relaxed);
        let mut map = self.inner.per_ip.lock().unwrap();
        *map.entry(ip).or_insert(0) += 1;
        ConnGuard { stats: self.clone(), ip }
    }

    pub fn live_connections(&self) -> i64 {
        self.inner.live_connections.load(Ordering::Relaxed)
    }

    pub fn connections_for(&self, ip: IpAddr) -> i64 {
        self.inner.per_ip.lock().unwrap().get(&ip).copied().unwrap_or(0)
    }

    pub fn record_accepted(&self) {
        self.inner.pipeline_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.inner.pipeline_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_size_rejected(&self) {
        self.inner.size_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> i64 {
        self.inner.pipeline_accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> i64 {
        self.inner.pipeline_dropped.load(Ordering::Relaxed)
    }

    pub fn size_rejected(&self) -> i64 {
        self.inner.size_rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_guard_decrements_on_drop() {
        let stats = Stats::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        {
            let _guard = stats.connection_opened(ip);
            assert_eq!(stats.live_connections(), 1);
            assert_eq!(stats.connections_for(ip), 1);
        }
        assert_eq!(stats.live_connections(), 0);
        assert_eq!(stats.connections_for(ip), 0);
    }

    #[test]
    fn accept_and_drop_counters_are_independent() {
        let stats = Stats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_dropped();
        assert_eq!(stats.accepted(), 2);
        assert_eq!(stats.dropped(), 1);
    }
}

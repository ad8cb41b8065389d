//! Shared scan health counters. Updated by the radar, read at shutdown and by any read surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    /// True while a scan is in progress.
    pub scanning: AtomicBool,
    pub scans_total: AtomicU64,
    /// Chain scans where every provider failed.
    pub chain_failures_total: AtomicU64,
    /// Millisecond timestamp of the last completed scan (0 = none).
    pub last_scan_at_ms: AtomicU64,
    pub last_scan_pools: AtomicU64,
    /// Chains that failed in the last scan.
    pub last_scan_failed_chains: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub scanning: bool,
    pub scans_total: u64,
    pub chain_failures_total: u64,
    pub last_scan_at_ms: Option<u64>,
    pub last_scan_pools: u64,
    pub last_scan_failed_chains: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scanning(&self, v: bool) {
        self.scanning.store(v, Ordering::Relaxed);
    }

    pub fn record_scan(&self, at_ms: u64, pools: usize, failed_chains: usize) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.chain_failures_total
            .fetch_add(failed_chains as u64, Ordering::Relaxed);
        self.last_scan_at_ms.store(at_ms, Ordering::Relaxed);
        self.last_scan_pools.store(pools as u64, Ordering::Relaxed);
        self.last_scan_failed_chains
            .store(failed_chains as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_scan_at_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            scanning: self.scanning.load(Ordering::Relaxed),
            scans_total: self.scans_total.load(Ordering::Relaxed),
            chain_failures_total: self.chain_failures_total.load(Ordering::Relaxed),
            last_scan_at_ms: (last > 0).then_some(last),
            last_scan_pools: self.last_scan_pools.load(Ordering::Relaxed),
            last_scan_failed_chains: self.last_scan_failed_chains.load(Ordering::Relaxed),
        }
    }
}

//! Counters for the periodic stats line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic counters, reset every time a snapshot is taken.
pub struct Stats {
    pub requests: AtomicU64,
    /// Questions answered from the local table.
    pub local: AtomicU64,
    /// Questions answered by an upstream.
    pub forwarded: AtomicU64,
    /// Questions inside the zone with no table entry.
    pub zone_misses: AtomicU64,
    /// Questions where every upstream failed.
    pub server_failures: AtomicU64,
    /// Cumulative handling time in microseconds for averaging.
    total_response_time_us: AtomicU64,
    started: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            local: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            zone_misses: AtomicU64::new(0),
            server_failures: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_request(&self, response_time_ms: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_local(&self) {
        self.local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_zone_miss(&self) {
        self.zone_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_server_failure(&self) {
        self.server_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let local = self.local.swap(0, Ordering::Relaxed);
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let zone_misses = self.zone_misses.swap(0, Ordering::Relaxed);
        let server_failures = self.server_failures.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests,
            local,
            forwarded,
            zone_misses,
            server_failures,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub local: u64,
    pub forwarded: u64,
    pub zone_misses: u64,
    pub server_failures: u64,
    pub avg_response_ms: f64,
}

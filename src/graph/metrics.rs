//! Refresh Metrics
//!
//! Cache-line aligned counters for the refresh loop. Written by the single
//! refresh writer, read by anyone.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Refresh counters, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct RefreshMetrics {
    /// Refreshes that published a new view
    pub refreshes: AtomicU64,
    /// Refreshes that failed with the master unavailable
    pub failures: AtomicU64,
    /// Callers that reused an in-flight refresh instead of running their own
    pub coalesced: AtomicU64,
    /// Participant address lookups issued
    pub lookups: AtomicU64,
    /// Participant address lookups that failed
    pub lookup_failures: AtomicU64,
    /// Duration of the last successful refresh in microseconds
    pub last_duration_us: AtomicU64,
    /// Last successful refresh timestamp (Unix millis)
    pub last_success_ms: AtomicU64,
    _padding: [u8; 8],
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<RefreshMetrics>() <= CACHE_LINE_SIZE);

impl Default for RefreshMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self {
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            last_duration_us: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_success(&self, duration: Duration) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.last_duration_us
            .store(duration.as_micros() as u64, Ordering::Relaxed);
        self.last_success_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lookups(&self, issued: usize, failed: usize) {
        self.lookups.fetch_add(issued as u64, Ordering::Relaxed);
        self.lookup_failures.fetch_add(failed as u64, Ordering::Relaxed);
    }

    /// Seconds since the last successful refresh, `None` if there was none
    pub fn staleness_secs(&self) -> Option<u64> {
        let last = self.last_success_ms.load(Ordering::Acquire);
        if last == 0 {
            return None;
        }
        let now_ms = Utc::now().timestamp_millis() as u64;
        Some(now_ms.saturating_sub(last) / 1000)
    }

    pub fn snapshot(&self) -> RefreshStatsSnapshot {
        RefreshStatsSnapshot {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            last_duration_us: self.last_duration_us.load(Ordering::Relaxed),
            staleness_secs: self.staleness_secs(),
        }
    }
}

/// Point-in-time copy of [`RefreshMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatsSnapshot {
    pub refreshes: u64,
    pub failures: u64,
    pub coalesced: u64,
    pub lookups: u64,
    pub lookup_failures: u64,
    pub last_duration_us: u64,
    pub staleness_secs: Option<u64>,
}

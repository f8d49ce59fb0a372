//! Observability and Metrics
//!
//! Counters describing deserialization outcomes, credential matching and
//! builder activity.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for deserialization and building
#[derive(Debug)]
pub struct Metrics {
    /// Total deserialize calls that produced a result
    pub advertisements_total: AtomicU64,
    /// Advertisements decoded as V0
    pub v0_advertisements: AtomicU64,
    /// Advertisements decoded as V1
    pub v1_advertisements: AtomicU64,
    /// Advertisements rejected as structurally invalid
    pub structural_errors: AtomicU64,
    /// Encrypted payloads or sections matched to a credential
    pub credential_matches: AtomicU64,
    /// Encrypted V0 payloads no credential could decrypt
    pub no_matching_credentials: AtomicU64,
    /// Encrypted V1 sections no credential could verify
    pub undecryptable_sections: AtomicU64,
    /// Allocations refused because a handle table was full
    pub resource_exhaustion: AtomicU64,
    /// Advertisements produced by the builders
    pub advertisements_serialized: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            advertisements_total: AtomicU64::new(0),
            v0_advertisements: AtomicU64::new(0),
            v1_advertisements: AtomicU64::new(0),
            structural_errors: AtomicU64::new(0),
            credential_matches: AtomicU64::new(0),
            no_matching_credentials: AtomicU64::new(0),
            undecryptable_sections: AtomicU64::new(0),
            resource_exhaustion: AtomicU64::new(0),
            advertisements_serialized: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a decoded V0 advertisement
    pub fn v0_advertisement(&self) {
        self.advertisements_total.fetch_add(1, Ordering::Relaxed);
        self.v0_advertisements.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decoded V1 advertisement
    pub fn v1_advertisement(&self) {
        self.advertisements_total.fetch_add(1, Ordering::Relaxed);
        self.v1_advertisements.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a structurally invalid advertisement
    pub fn structural_error(&self) {
        self.advertisements_total.fetch_add(1, Ordering::Relaxed);
        self.structural_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn credential_match(&self) {
        self.credential_matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn no_matching_credential(&self) {
        self.no_matching_credentials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn undecryptable_sections(&self, count: u64) {
        self.undecryptable_sections.fetch_add(count, Ordering::Relaxed);
    }

    pub fn resource_exhausted(&self) {
        self.resource_exhaustion.fetch_add(1, Ordering::Relaxed);
    }

    pub fn advertisement_serialized(&self) {
        self.advertisements_serialized.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            advertisements_total: self.advertisements_total.load(Ordering::Relaxed),
            v0_advertisements: self.v0_advertisements.load(Ordering::Relaxed),
            v1_advertisements: self.v1_advertisements.load(Ordering::Relaxed),
            structural_errors: self.structural_errors.load(Ordering::Relaxed),
            credential_matches: self.credential_matches.load(Ordering::Relaxed),
            no_matching_credentials: self.no_matching_credentials.load(Ordering::Relaxed),
            undecryptable_sections: self.undecryptable_sections.load(Ordering::Relaxed),
            resource_exhaustion: self.resource_exhaustion.load(Ordering::Relaxed),
            advertisements_serialized: self.advertisements_serialized.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            advertisements_total = snapshot.advertisements_total,
            v0_advertisements = snapshot.v0_advertisements,
            v1_advertisements = snapshot.v1_advertisements,
            structural_errors = snapshot.structural_errors,
            credential_matches = snapshot.credential_matches,
            no_matching_credentials = snapshot.no_matching_credentials,
            undecryptable_sections = snapshot.undecryptable_sections,
            resource_exhaustion = snapshot.resource_exhaustion,
            advertisements_serialized = snapshot.advertisements_serialized,
            uptime_seconds = snapshot.uptime_seconds,
            "Presence metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub advertisements_total: u64,
    pub v0_advertisements: u64,
    pub v1_advertisements: u64,
    pub structural_errors: u64,
    pub credential_matches: u64,
    pub no_matching_credentials: u64,
    pub undecryptable_sections: u64,
    pub resource_exhaustion: u64,
    pub advertisements_serialized: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

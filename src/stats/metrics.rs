//! Statistics and metrics for hub sessions

use std::collections::HashMap;
use std::time::Duration;

use crate::protocol::PackageName;

/// Display request counters for one app
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppDisplayCounts {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub throttled: u64,
    pub blocked: u64,
}

/// Display scheduler metrics for one session
#[derive(Debug, Clone, Default)]
pub struct DisplayMetrics {
    /// Requests submitted, valid or not
    pub requests_total: u64,
    /// Requests that reached the screen (or were accepted behind an override)
    pub succeeded: u64,
    /// Requests rejected by validation or because the app was not running
    pub failed: u64,
    /// Requests held in a throttle slot
    pub throttled: u64,
    /// Requests refused because another app holds the background lock
    pub blocked: u64,
    /// Running average of submit-to-screen latency
    pub average_latency: Duration,
    /// Per-app breakdown
    pub per_app: HashMap<PackageName, AppDisplayCounts>,
    latency_samples: u64,
}

impl DisplayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, package: &PackageName) {
        self.requests_total += 1;
        self.app(package).requests += 1;
    }

    pub fn record_succeeded(&mut self, package: &PackageName, latency: Duration) {
        self.succeeded += 1;
        self.app(package).succeeded += 1;

        // incremental mean
        self.latency_samples += 1;
        let n = self.latency_samples as u128;
        let avg = self.average_latency.as_nanos();
        let sample = latency.as_nanos();
        let next = if sample >= avg {
            avg + (sample - avg) / n
        } else {
            avg - (avg - sample) / n
        };
        self.average_latency = Duration::from_nanos(next.min(u64::MAX as u128) as u64);
    }

    pub fn record_failed(&mut self, package: &PackageName) {
        self.failed += 1;
        self.app(package).failed += 1;
    }

    pub fn record_throttled(&mut self, package: &PackageName) {
        self.throttled += 1;
        self.app(package).throttled += 1;
    }

    pub fn record_blocked(&mut self, package: &PackageName) {
        self.blocked += 1;
        self.app(package).blocked += 1;
    }

    /// Counters for one app (zeroes if it never submitted)
    pub fn for_app(&self, package: &str) -> AppDisplayCounts {
        self.per_app.get(package).copied().unwrap_or_default()
    }

    fn app(&mut self, package: &PackageName) -> &mut AppDisplayCounts {
        self.per_app.entry(package.clone()).or_default()
    }
}

/// Session-level routing statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Inbound messages accepted from the glasses
    pub glasses_messages: u64,
    /// Inbound messages accepted from apps
    pub app_messages: u64,
    /// Stream events broadcast
    pub events_routed: u64,
    /// Successful per-recipient deliveries
    pub events_delivered: u64,
    /// Failed per-recipient deliveries
    pub delivery_failures: u64,
    /// Display updates sent to the glasses
    pub display_updates: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }
}

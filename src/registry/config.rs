//! Server registry configuration

use std::time::Duration;

/// Server registry configuration options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval at which app servers are expected to heartbeat
    pub heartbeat_interval: Duration,

    /// Heartbeats that may be missed before a registration goes inactive
    pub missed_heartbeats: u32,

    /// How long an inactive registration is kept before removal
    pub removal_after: Duration,

    /// How often the cleanup sweep runs
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            missed_heartbeats: 3,
            removal_after: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    /// Silence after which a registration is marked inactive
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats.max(1)
    }

    /// Set the expected heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the number of missed heartbeats tolerated (at least 1)
    pub fn missed_heartbeats(mut self, missed: u32) -> Self {
        self.missed_heartbeats = missed.max(1);
        self
    }

    /// Set how long inactive registrations are kept
    pub fn removal_after(mut self, after: Duration) -> Self {
        self.removal_after = after;
        self
    }

    /// Set the cleanup sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

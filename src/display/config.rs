//! Display scheduler configuration

use std::time::Duration;

use crate::protocol::PackageName;

/// Display scheduler configuration
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// How long the boot screen is shown when an app starts
    pub boot_duration: Duration,

    /// Minimum interval between two displays from the same app
    pub throttle_interval: Duration,

    /// Number of shown displays kept in the history ring buffer
    pub history_capacity: usize,

    /// Package name used for displays the hub itself produces
    pub system_package: PackageName,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            boot_duration: Duration::from_millis(1500),
            throttle_interval: Duration::from_millis(300),
            history_capacity: 64,
            system_package: PackageName::from("system"),
        }
    }
}

impl DisplayConfig {
    /// Set the boot screen duration
    pub fn boot_duration(mut self, duration: Duration) -> Self {
        self.boot_duration = duration;
        self
    }

    /// Set the per-app throttle interval
    pub fn throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Set the history capacity (at least 1)
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Set the package name used for system displays
    pub fn system_package(mut self, package: impl Into<PackageName>) -> Self {
        self.system_package = package.into();
        self
    }
}

//! Hub configuration

use std::time::Duration;

use crate::display::DisplayConfig;
use crate::registry::RegistryConfig;

/// Hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// URL apps reconnect to; sent in recovery notifications
    pub public_url: String,

    /// How long a session survives without a glasses connection
    pub session_grace_period: Duration,

    /// How often expired sessions are swept
    pub session_cleanup_interval: Duration,

    /// Delivery attempts per recovery notification
    pub recovery_max_attempts: u32,

    /// Delay between recovery delivery attempts
    pub recovery_retry_delay: Duration,

    /// Display scheduler settings applied to every session
    pub display: DisplayConfig,

    /// Server registry settings
    pub registry: RegistryConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            public_url: "ws://localhost:8002/tpa-ws".into(),
            session_grace_period: Duration::from_secs(60),
            session_cleanup_interval: Duration::from_secs(5),
            recovery_max_attempts: 3,
            recovery_retry_delay: Duration::from_secs(1),
            display: DisplayConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl HubConfig {
    /// Create a new config with a custom public URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            public_url: url.into(),
            ..Default::default()
        }
    }

    /// Set the public URL
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into();
        self
    }

    /// Set the session grace period
    pub fn session_grace_period(mut self, period: Duration) -> Self {
        self.session_grace_period = period;
        self
    }

    /// Set the session sweep interval
    pub fn session_cleanup_interval(mut self, interval: Duration) -> Self {
        self.session_cleanup_interval = interval;
        self
    }

    /// Set recovery delivery attempts (at least 1)
    pub fn recovery_max_attempts(mut self, attempts: u32) -> Self {
        self.recovery_max_attempts = attempts.max(1);
        self
    }

    /// Set the delay between recovery attempts
    pub fn recovery_retry_delay(mut self, delay: Duration) -> Self {
        self.recovery_retry_delay = delay;
        self
    }

    /// Set display scheduler settings
    pub fn display(mut self, display: DisplayConfig) -> Self {
        self.display = display;
        self
    }

    /// Set server registry settings
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.session_grace_period, Duration::from_secs(60));
        assert_eq!(config.recovery_max_attempts, 3);
        assert_eq!(config.display.throttle_interval, Duration::from_millis(300));
        assert_eq!(config.registry.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_with_url() {
        let config = HubConfig::with_url("wss://hub.example/tpa");
        assert_eq!(config.public_url, "wss://hub.example/tpa");
    }

    #[test]
    fn test_builder_recovery_attempts_floor() {
        let config = HubConfig::default().recovery_max_attempts(0);
        assert_eq!(config.recovery_max_attempts, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .public_url("wss://a")
            .session_grace_period(Duration::from_secs(5))
            .session_cleanup_interval(Duration::from_secs(1))
            .recovery_retry_delay(Duration::from_millis(250))
            .display(DisplayConfig::default().boot_duration(Duration::ZERO))
            .registry(RegistryConfig::default().missed_heartbeats(5));

        assert_eq!(config.public_url, "wss://a");
        assert_eq!(config.session_grace_period, Duration::from_secs(5));
        assert_eq!(config.session_cleanup_interval, Duration::from_secs(1));
        assert_eq!(config.recovery_retry_delay, Duration::from_millis(250));
        assert_eq!(config.display.boot_duration, Duration::ZERO);
        assert_eq!(config.registry.missed_heartbeats, 5);
    }
}

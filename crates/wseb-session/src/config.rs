//! Session tuning shared by every session a gateway creates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wseb_proto::frame::DEFAULT_MAX_FRAME_SIZE;

/// Default client idle timeout advertised on downstream responses.
pub const DEFAULT_CLIENT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Default silence after which a session is force-closed.
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 120;

/// Default wait for the peer's CLOSE.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;

/// Default wait for a replacement writer after a reconnect.
pub const DEFAULT_RECONNECT_TIMEOUT_SECS: u64 = 60;

/// Default wait for the first downstream carrier after create.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Timeouts and capacities for emulated sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Client idle timeout in seconds. Keepalive NOOPs go out at half this
    /// interval. Zero disables keepalive.
    pub client_idle_timeout_secs: u64,
    /// Inactivity timeout in seconds. Zero disables the inactivity tracker.
    pub inactivity_timeout_secs: u64,
    /// Close handshake timeout in seconds.
    pub close_timeout_secs: u64,
    /// Reconnect window in seconds.
    pub reconnect_timeout_secs: u64,
    /// Downstream attach window after create, in seconds.
    pub connect_timeout_secs: u64,
    /// Queued application messages above which sends are held back.
    pub outbound_high_water: usize,
    /// Chunks buffered per downstream carrier before writes wait.
    pub carrier_capacity: usize,
    /// Messages buffered between the upstream and the application.
    pub inbound_capacity: usize,
    /// Inactivity sweep period in milliseconds.
    pub inactivity_sweep_ms: u64,
    /// Largest frame accepted on an upstream carrier.
    pub max_frame_size: usize,
}

impl SessionConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            client_idle_timeout_secs: DEFAULT_CLIENT_IDLE_TIMEOUT_SECS,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            reconnect_timeout_secs: DEFAULT_RECONNECT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            outbound_high_water: 256,
            carrier_capacity: 32,
            inbound_capacity: 64,
            inactivity_sweep_ms: 1000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the client idle timeout.
    #[must_use]
    pub const fn with_client_idle_timeout(mut self, timeout: Duration) -> Self {
        self.client_idle_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the inactivity timeout.
    #[must_use]
    pub const fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the reconnect window.
    #[must_use]
    pub const fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the downstream attach window.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the outbound high-water mark.
    #[must_use]
    pub const fn with_outbound_high_water(mut self, messages: usize) -> Self {
        self.outbound_high_water = messages;
        self
    }

    /// Set the per-carrier buffer.
    #[must_use]
    pub const fn with_carrier_capacity(mut self, chunks: usize) -> Self {
        self.carrier_capacity = chunks;
        self
    }

    /// Client idle timeout.
    #[must_use]
    pub const fn client_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_idle_timeout_secs)
    }

    /// Default keepalive interval, or `None` when keepalive is disabled.
    #[must_use]
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.client_idle_timeout_secs > 0).then(|| self.client_idle_timeout() / 2)
    }

    /// Inactivity timeout, or `None` when disabled.
    #[must_use]
    pub const fn inactivity_timeout(&self) -> Option<Duration> {
        if self.inactivity_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.inactivity_timeout_secs))
        }
    }

    /// Close handshake timeout.
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    /// Reconnect window.
    #[must_use]
    pub const fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    /// Downstream attach window.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Inactivity sweep period.
    #[must_use]
    pub const fn inactivity_sweep_period(&self) -> Duration {
        Duration::from_millis(self.inactivity_sweep_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.close_timeout_secs == 0 {
            return Err("close_timeout_secs must be greater than zero".to_string());
        }
        if self.reconnect_timeout_secs == 0 {
            return Err("reconnect_timeout_secs must be greater than zero".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than zero".to_string());
        }
        if self.carrier_capacity == 0 || self.inbound_capacity == 0 {
            return Err("channel capacities must be greater than zero".to_string());
        }
        if self.outbound_high_water == 0 {
            return Err("outbound_high_water must be greater than zero".to_string());
        }
        if self.inactivity_timeout_secs > 0 && self.inactivity_sweep_ms == 0 {
            return Err("inactivity_sweep_ms must be greater than zero".to_string());
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keepalive_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.inactivity_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_idle_timeout_disables_keepalive() {
        let config = SessionConfig::new().with_client_idle_timeout(Duration::ZERO);
        assert_eq!(config.keepalive_interval(), None);
    }

    #[test]
    fn test_zero_inactivity_timeout_disables_tracker() {
        let config = SessionConfig::new().with_inactivity_timeout(Duration::ZERO);
        assert_eq!(config.inactivity_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = SessionConfig::new().with_carrier_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_close_timeout() {
        let config = SessionConfig::new().with_close_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}

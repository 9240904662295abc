//! Transport configuration.

use std::env;
use std::time::Duration;

/// Settings for [`WsTransport`](crate::WsTransport).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hub URL, e.g. `ws://localhost:3000/hub/people`
    pub url: String,
    /// How long an invocation waits for its completion
    pub request_timeout: Duration,
    /// First reconnect delay
    pub reconnect_min_delay: Duration,
    /// Upper bound for the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Interval between keep-alive pings
    pub keep_alive: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(10),
            reconnect_min_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(5),
            keep_alive: Duration::from_secs(15),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `KEYSYNC_URL` is required. `KEYSYNC_REQUEST_TIMEOUT_MS` optionally
    /// overrides the request timeout.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("KEYSYNC_URL").map_err(|_| ConfigError::MissingUrl)?;
        let mut config = Self::new(url);

        if let Ok(raw) = env::var("KEYSYNC_REQUEST_TIMEOUT_MS") {
            let millis: u64 = raw.parse().map_err(|_| ConfigError::InvalidTimeout)?;
            config.request_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delays(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min_delay = min;
        self.reconnect_max_delay = max.max(min);
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("KEYSYNC_URL environment variable is required")]
    MissingUrl,

    #[error("Invalid KEYSYNC_REQUEST_TIMEOUT_MS value")]
    InvalidTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransportConfig::new("ws://localhost:3000/hub/people");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_min_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(5));
    }

    #[test]
    fn reconnect_delays_are_ordered() {
        let config = TransportConfig::new("ws://x")
            .with_reconnect_delays(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(2));
    }
}

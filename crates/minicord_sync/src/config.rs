//! Configuration for the sync core.

use minicord_protocol::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use std::fmt;
use std::time::Duration;

/// Configuration for a chat client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Push-channel endpoint (e.g., "ws://localhost:8080/ws").
    pub ws_endpoint: String,
    /// Base URL of the request/response API (e.g., "http://localhost:8080/").
    pub api_base_url: String,
    /// Messages requested per history page.
    pub page_limit: u32,
    /// Timeout for history requests.
    pub request_timeout: Duration,
    /// Reconnection behavior of the push channel.
    pub reconnect: ReconnectConfig,
    /// Capacity of the coordinator's change feed.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(ws_endpoint: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            ws_endpoint: ws_endpoint.into(),
            api_base_url: api_base_url.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            event_capacity: 256,
        }
    }

    /// Sets the page size, clamped to the server's bounds.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the reconnection configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the change feed capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("ws://localhost:8080/ws", "http://localhost:8080/")
    }
}

/// Backoff between push-channel reconnection attempts.
///
/// Attempts are unbounded; the connection keeps retrying until it is
/// closed explicitly.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl ReconnectConfig {
    /// Creates a configuration starting at `initial_delay`.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.3,
            add_jitter: true,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before retry `attempt` (1-indexed; 0 means none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(64) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Pseudo-random jitter in `[0, 1)` derived from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Opaque bearer token supplied by the auth collaborator.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    /// Wraps a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("ws://chat.example.com/ws", "https://chat.example.com/")
            .with_page_limit(25)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.ws_endpoint, "ws://chat.example.com/ws");
        assert_eq!(config.page_limit, 25);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(ClientConfig::default().with_page_limit(0).page_limit, 1);
        assert_eq!(
            ClientConfig::default().with_page_limit(1_000).page_limit,
            MAX_PAGE_LIMIT
        );
    }

    #[test]
    fn reconnect_delay_grows() {
        let config = ReconnectConfig::new(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn reconnect_delay_respects_max() {
        let config = ReconnectConfig::new(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(50);
        assert!(delay <= Duration::from_millis(6250)); // 5s + 25% jitter
    }

    #[test]
    fn credentials_are_redacted() {
        let creds = Credentials::new("secret-token");
        assert_eq!(creds.token(), "secret-token");
        assert!(!format!("{creds:?}").contains("secret"));
    }
}

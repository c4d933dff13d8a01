//! Registry configuration.

use std::time::Duration;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default upper bound on the reconnect delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default backoff growth factor.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default number of reconnect attempts before a topic is closed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// How a topic recovers from transport failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
    /// Growth factor applied per consecutive failure.
    pub multiplier: f64,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Whether the transport recovers on its own after a channel error.
    ///
    /// When set, a reported channel error only moves the topic to
    /// `Erroring` and the topic waits for the transport to acknowledge again.
    /// A dropped stream is always reopened by the topic itself.
    pub transport_self_heals: bool,
}

impl ReconnectPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            transport_self_heals: true,
        }
    }

    /// Set the initial backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the maximum backoff.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Set the backoff multiplier (values below 1.0 are treated as 1.0).
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the maximum number of consecutive attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set whether the transport self-heals after channel errors.
    pub fn with_transport_self_heals(mut self, self_heals: bool) -> Self {
        self.transport_self_heals = self_heals;
        self
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(63) as i32;
        let factor = self.multiplier.powi(exponent);
        let nanos = self.initial_backoff.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_backoff.as_nanos() as f64 {
            self.max_backoff
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel registry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Reconnect behaviour for every topic.
    pub reconnect: ReconnectPolicy,
    /// Catch panics raised by consumer callbacks.
    pub catch_callback_panics: bool,
}

impl RegistryConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            catch_callback_panics: true,
        }
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set whether consumer panics are caught.
    pub fn with_catch_callback_panics(mut self, catch: bool) -> Self {
        self.catch_callback_panics = catch;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.reconnect.initial_backoff, DEFAULT_INITIAL_BACKOFF);
        assert_eq!(config.reconnect.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.reconnect.transport_self_heals);
        assert!(config.catch_callback_panics);
    }

    #[test]
    fn test_exponential_delay() {
        let policy = ReconnectPolicy::new()
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(1));

        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(5), Duration::from_secs(1));
        assert_eq!(policy.delay(500), Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_cap() {
        let policy = ReconnectPolicy::new().with_max_attempts(2);
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn test_multiplier_floor() {
        let policy = ReconnectPolicy::new()
            .with_initial_backoff(Duration::from_millis(50))
            .with_multiplier(0.1);
        assert_eq!(policy.delay(4), Duration::from_millis(50));
    }
}

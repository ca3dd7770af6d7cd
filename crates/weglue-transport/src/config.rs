//! Connection manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for connection establishment and reconnection behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout for a single connection attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Base delay for exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between reconnection attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier (2.0 doubles the delay each attempt).
    pub backoff_multiplier: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ConnectionConfig {
    /// Timeout for a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Exponential backoff delay before reconnection attempt
    /// `attempt_number` (1-based), capped at `max_delay_ms`.
    ///
    /// Retries are indefinite; there is no attempt ceiling. The only way out
    /// of the reconnection loop is a successful session or an explicit
    /// `disconnect()`.
    pub fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(31);
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = ConnectionConfig {
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            ..Default::default()
        };

        assert_eq!(config.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(config.backoff_delay(6), Duration::from_millis(30_000)); // capped
        assert_eq!(config.backoff_delay(40), Duration::from_millis(30_000)); // exponent clamped
    }

    #[test]
    fn test_default_matches_policy() {
        let config = ConnectionConfig::default();
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 30_000);
    }
}

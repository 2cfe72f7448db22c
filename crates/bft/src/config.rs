//! BFT configuration.

use std::time::Duration;

/// Consensus knobs.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Base pacemaker timeout.
    pub timeout_ms: u64,
    /// Exponential backoff rate per consecutive timed-out view.
    pub rate: f64,
    /// Cap on the backoff exponent. Zero keeps the timeout flat.
    pub max_exp: u32,
    /// Vertices requested per catch-up round when a parent is missing.
    pub vertex_request_count: u32,
}

impl Default for BftConfig {
    fn default() -> Self {
        BftConfig {
            timeout_ms: 3_000,
            rate: 1.1,
            max_exp: 0,
            vertex_request_count: 3,
        }
    }
}

impl BftConfig {
    /// The timeout for the `n`-th consecutive timed-out view.
    pub fn timeout_for(&self, consecutive_timeouts: u32) -> Duration {
        let exponent = consecutive_timeouts.min(self.max_exp);
        let millis = self.timeout_ms as f64 * self.rate.powi(exponent as i32);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_flat() {
        let config = BftConfig::default();
        assert_eq!(config.timeout_for(0), Duration::from_millis(3_000));
        assert_eq!(config.timeout_for(10), Duration::from_millis(3_000));
    }

    #[test]
    fn backoff_grows_until_the_cap() {
        let config = BftConfig {
            timeout_ms: 1_000,
            rate: 2.0,
            max_exp: 3,
            ..Default::default()
        };
        assert_eq!(config.timeout_for(0), Duration::from_millis(1_000));
        assert_eq!(config.timeout_for(1), Duration::from_millis(2_000));
        assert_eq!(config.timeout_for(3), Duration::from_millis(8_000));
        assert_eq!(config.timeout_for(9), Duration::from_millis(8_000));
    }
}

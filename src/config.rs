//! Configuration for the recurrence sweep and the sync client.

use time::{Duration, UtcOffset};

use crate::recurring::DEFAULT_MAX_CATCH_UP_ITERATIONS;

/// The config that controls how recurring rules are processed on the server.
#[derive(Debug, Clone)]
pub struct RecurrenceConfig {
    /// How often the periodic sweep looks for due rules.
    pub sweep_interval: std::time::Duration,
    /// The most steps a catch-up may take before giving up with a scheduling error.
    pub max_catch_up_iterations: u32,
    /// The offset of the server's timezone, used to decide which calendar day
    /// a timestamp falls on.
    pub utc_offset: UtcOffset,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: std::time::Duration::from_secs(60),
            max_catch_up_iterations: DEFAULT_MAX_CATCH_UP_ITERATIONS,
            utc_offset: UtcOffset::UTC,
        }
    }
}

/// The config that controls how the client replays queued operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The delay before the first retry of a failed operation.
    pub backoff_base: Duration,
    /// The longest delay between retries of a failed operation.
    pub backoff_cap: Duration,
    /// How many extra passes a drain may make for operations that were
    /// deferred on categories resolved earlier in the same drain.
    pub max_dependent_passes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::seconds(5),
            backoff_cap: Duration::minutes(15),
            max_dependent_passes: 2,
        }
    }
}

impl SyncConfig {
    /// The delay before an operation that has failed `retry_count` times may be attempted again.
    ///
    /// Doubles with every failure, starting at [SyncConfig::backoff_base] and
    /// never exceeding [SyncConfig::backoff_cap].
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(30);

        self.backoff_base
            .checked_mul(1 << exponent)
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::SyncConfig;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let config = SyncConfig::default();

        assert_eq!(config.backoff_delay(1), Duration::seconds(5));
        assert_eq!(config.backoff_delay(2), Duration::seconds(10));
        assert_eq!(config.backoff_delay(3), Duration::seconds(20));
        assert_eq!(config.backoff_delay(20), Duration::minutes(15));
    }

    #[test]
    fn zero_base_disables_backoff() {
        let config = SyncConfig {
            backoff_base: Duration::ZERO,
            ..Default::default()
        };

        assert_eq!(config.backoff_delay(7), Duration::ZERO);
    }
}

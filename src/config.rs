//! Scheduler configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for the monitor's scheduling loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between standard allocation passes.
    pub standard_loop_delay: Duration,
    /// Interval between priority passes.
    pub priority_loop_delay: Duration,
    /// Interval between cleanup passes.
    pub cleanup_loop_delay: Duration,
    /// How often processors are expected to check in. A processor is
    /// dead once it has missed two of these.
    pub processor_check_in_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            standard_loop_delay: Duration::from_secs(300),
            priority_loop_delay: Duration::from_secs(60),
            cleanup_loop_delay: Duration::from_secs(300),
            processor_check_in_delay: Duration::from_secs(300),
        }
    }
}

impl MonitorConfig {
    /// Sets the standard loop interval.
    pub fn with_standard_loop_delay(mut self, delay: Duration) -> Self {
        self.standard_loop_delay = delay;
        self
    }

    /// Sets the priority loop interval.
    pub fn with_priority_loop_delay(mut self, delay: Duration) -> Self {
        self.priority_loop_delay = delay;
        self
    }

    /// Sets the cleanup loop interval.
    pub fn with_cleanup_loop_delay(mut self, delay: Duration) -> Self {
        self.cleanup_loop_delay = delay;
        self
    }

    /// Sets the expected processor check-in interval.
    pub fn with_processor_check_in_delay(mut self, delay: Duration) -> Self {
        self.processor_check_in_delay = delay;
        self
    }

    /// Liveness cutoff for a pass starting at `now`: processors last seen
    /// before this instant are dead.
    pub fn dead_processor_threshold(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::seconds(self.processor_check_in_delay.as_secs() as i64 * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays() {
        let config = MonitorConfig::default();
        assert_eq!(config.standard_loop_delay, Duration::from_secs(300));
        assert_eq!(config.priority_loop_delay, Duration::from_secs(60));
        assert_eq!(config.cleanup_loop_delay, Duration::from_secs(300));
        assert_eq!(config.processor_check_in_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_dead_threshold_is_two_check_ins() {
        let config = MonitorConfig::default().with_processor_check_in_delay(Duration::from_secs(60));
        let now = Utc::now();
        assert_eq!(
            config.dead_processor_threshold(now),
            now - chrono::Duration::seconds(120)
        );
    }
}

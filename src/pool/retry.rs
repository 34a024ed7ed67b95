//! Task outcomes and the escalating retry schedule.

use std::time::Duration;

/// What one task attempt reported.
///
/// `Err` from the task action is a fourth, implicit case: an unexpected
/// failure, treated as terminal like `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The job was processed; move on.
    Ok,
    /// The job failed for good; move on without retrying.
    Failure,
    /// A transient condition; retry the same job after a backoff delay.
    Retry,
}

/// Escalating backoff schedule for `TaskOutcome::Retry`.
///
/// The n-th retry of a job waits for the n-th delay in the schedule;
/// past the end, the final delay repeats indefinitely. There is no
/// retry cap: a job that keeps asking for retries occupies its worker
/// until shutdown.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: [10, 30, 60, 120, 300]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom schedule.
    ///
    /// An empty schedule degenerates to immediate retries.
    pub fn with_schedule(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before the next attempt, given how many retries the job has
    /// already had.
    pub fn next_delay(&self, retries_so_far: u32) -> Duration {
        match self.delays.last() {
            Some(last) => *self
                .delays
                .get(retries_so_far as usize)
                .unwrap_or(last),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_escalates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_secs(10));
        assert_eq!(policy.next_delay(1), Duration::from_secs(30));
        assert_eq!(policy.next_delay(2), Duration::from_secs(60));
        assert_eq!(policy.next_delay(3), Duration::from_secs(120));
        assert_eq!(policy.next_delay(4), Duration::from_secs(300));
    }

    #[test]
    fn test_schedule_holds_at_maximum() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(5), Duration::from_secs(300));
        assert_eq!(policy.next_delay(1000), Duration::from_secs(300));
    }

    #[test]
    fn test_custom_schedule() {
        let policy = RetryPolicy::with_schedule(vec![Duration::from_millis(50)]);
        assert_eq!(policy.next_delay(0), Duration::from_millis(50));
        assert_eq!(policy.next_delay(9), Duration::from_millis(50));
    }

    #[test]
    fn test_empty_schedule_is_immediate() {
        let policy = RetryPolicy::with_schedule(vec![]);
        assert_eq!(policy.next_delay(0), Duration::ZERO);
    }
}

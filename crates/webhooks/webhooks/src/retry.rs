//! Retry strategies for webhook delivery.

use std::time::Duration;

/// Trait for retry strategies.
pub trait RetryStrategy: Send + Sync {
    /// Returns the delay before the attempt following `attempt` (1-based),
    /// or `None` if `attempt` was the last one allowed.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Returns the maximum number of attempts.
    fn max_attempts(&self) -> u32;

    /// Checks if another attempt may follow `attempt`.
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

/// Fixed backoff schedule.
///
/// The n-th retry waits `delays[n - 1]`; when the budget outlasts the
/// schedule, the last delay repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    /// Delays between consecutive attempts.
    pub delays: Vec<Duration>,
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
}

impl BackoffSchedule {
    /// Creates the default schedule: 1s, 5s, 30s, 5m with 5 attempts.
    pub fn new() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(300),
            ],
            max_attempts: 5,
        }
    }

    /// Sets the delays.
    pub fn delays(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.delays = delays.into_iter().collect();
        self
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for BackoffSchedule {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || !self.should_retry(attempt) {
            return None;
        }

        let idx = (attempt as usize - 1).min(self.delays.len().checked_sub(1)?);
        self.delays.get(idx).copied()
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let schedule = BackoffSchedule::new();

        assert_eq!(schedule.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_delay(2), Some(Duration::from_secs(5)));
        assert_eq!(schedule.next_delay(3), Some(Duration::from_secs(30)));
        assert_eq!(schedule.next_delay(4), Some(Duration::from_secs(300)));
        assert_eq!(schedule.next_delay(5), None);
        assert!(!schedule.should_retry(5));
    }

    #[test]
    fn test_last_delay_repeats() {
        let schedule = BackoffSchedule::new()
            .delays([Duration::from_secs(2), Duration::from_secs(10)])
            .max_attempts(5);

        assert_eq!(schedule.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_delay(2), Some(Duration::from_secs(10)));
        assert_eq!(schedule.next_delay(3), Some(Duration::from_secs(10)));
        assert_eq!(schedule.next_delay(4), Some(Duration::from_secs(10)));
        assert_eq!(schedule.next_delay(5), None);
    }

    #[test]
    fn test_single_attempt_budget() {
        let schedule = BackoffSchedule::new().max_attempts(1);
        assert_eq!(schedule.next_delay(1), None);
    }

    #[test]
    fn test_empty_schedule_never_retries() {
        let schedule = BackoffSchedule::new().delays([]);
        assert_eq!(schedule.next_delay(1), None);
    }
}

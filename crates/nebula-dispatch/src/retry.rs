use std::time::{Duration, Instant};

/// Re-exports the type from the `exponential-backoff` crate, so that users
/// of this crate don't need to add their own dependency in order to
/// configure it.
pub use exponential_backoff::Backoff;

/// Schedules active-failover and 503-retry delays: exponential backoff
/// starting at 125ms, capped at 10s per step, bounded by an overall budget
/// measured from construction.
#[derive(Debug, Clone)]
pub struct FailoverBackoff {
    attempt: u32,
    backoff: Backoff,
    deadline: Instant,
}

/// The default overall retry budget for a single logical dispatch, absent
/// an explicit queue-timeout option on the request context.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(60);

impl FailoverBackoff {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_BUDGET)
    }

    pub fn with_budget(budget: Duration) -> Self {
        Self {
            attempt: 0,
            backoff: Backoff::new(
                u32::MAX,
                Duration::from_millis(125),
                Some(Duration::from_secs(10)),
            ),
            deadline: Instant::now() + budget,
        }
    }

    /// The delay before the next attempt, or `None` once the overall budget
    /// is exhausted and the caller should surface the last error instead.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if Instant::now() >= self.deadline {
            return None;
        }
        self.attempt += 1;
        self.backoff.next(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for FailoverBackoff {
    fn default() -> Self {
        Self::new()
    }
}

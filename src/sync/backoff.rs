//! Retry delays after failed syncs

use std::time::Duration;

/// Default retry schedule: 2s, 5s, 15s, then 60s for every further failure
pub const DEFAULT_BACKOFF: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(60),
];

/// Walks a fixed schedule of delays, saturating at the last entry
#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: Vec<Duration>,
    index: usize,
}

impl Backoff {
    /// An empty schedule falls back to [`DEFAULT_BACKOFF`]
    pub fn new(schedule: Vec<Duration>) -> Self {
        let schedule = if schedule.is_empty() {
            DEFAULT_BACKOFF.to_vec()
        } else {
            schedule
        };
        Self { schedule, index: 0 }
    }

    /// Delay before the next retry; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let last = self.schedule.len() - 1;
        let delay = self.schedule[self.index.min(last)];
        if self.index < last {
            self.index += 1;
        }
        delay
    }

    /// Back to the first entry after a success
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

//! Capped exponential backoff around remote calls.

use std::time::{Duration, Instant};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// First sleep.
    pub start: Duration,
    /// Cap on a single sleep and on the total time spent retrying.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            start: Duration::from_secs(5),
            max: Duration::from_secs(30 * 60),
        }
    }
}

impl Backoff {
    pub fn new(start: Duration, max: Duration) -> Self {
        Backoff { start, max }
    }

    /// Runs `op`, retrying transient failures. Other errors, and the last
    /// transient error once the time budget is spent, are returned as-is.
    pub fn retry<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.retry_with(what, op, std::thread::sleep)
    }

    /// [`Backoff::retry`] with an injected sleep function.
    pub fn retry_with<T, F, S>(&self, what: &str, mut op: F, mut sleep: S) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        S: FnMut(Duration),
    {
        let started = Instant::now();
        let mut slept = Duration::ZERO;
        let mut period = self.start;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    let spent = started.elapsed().max(slept);
                    if spent + period > self.max {
                        tracing::error!("{} failed, giving up after {:?}: {}", what, spent, e);
                        return Err(e);
                    }
                    tracing::warn!("{} failed, sleeping for {:?}: {}", what, period, e);
                    sleep(period);
                    slept += period;
                    period = (period * 2).min(self.max);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

use std::{fmt, future::Future, time::Duration};

use tracing::warn;

const DEFAULT_DELAYS: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(5)];

/// A fixed retry schedule.
///
/// The first attempt always runs immediately. Every subsequent attempt waits for the next delay
/// in the schedule, so an operation runs at most `1 + delays.len()` times.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    delays: Vec<Duration>,
}

impl Backoff {
    /// Creates a schedule from the delays to wait before each retry.
    pub fn new<I>(delays: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        Backoff { delays: delays.into_iter().collect() }
    }

    /// Creates a schedule that never retries.
    pub fn none() -> Self {
        Backoff { delays: Vec::new() }
    }

    /// Returns the delays waited before each retry.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Returns the maximum number of attempts, including the first one.
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Runs `operation` until it succeeds or the schedule is exhausted.
    ///
    /// Each failed attempt is logged as a warning, tagged with `name`. If every attempt fails, the
    /// error from the last attempt is returned.
    pub async fn retry<T, E, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts();
        let mut result = operation().await;
        for (attempt, delay) in self.delays.iter().enumerate() {
            if let Err(e) = &result {
                warn!(
                    operation = name,
                    attempt = attempt + 1,
                    attempts,
                    error = %e,
                    retry_in = ?delay,
                    "Attempt failed, retrying."
                );
            } else {
                return result;
            }

            tokio::time::sleep(*delay).await;
            result = operation().await;
        }

        if let Err(e) = &result {
            warn!(operation = name, attempts, error = %e, "Final attempt failed.");
        }
        result
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(DEFAULT_DELAYS)
    }
}

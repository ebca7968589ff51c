//! Exponential backoff shared by every outbound HTTP call.

use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(150);
const MAX_DELAY: Duration = Duration::from_millis(1200);
const MAX_JITTER_MS: u64 = 50;

/// Budget of attempts for one request.
///
/// Call [`Backoff::wait`] after each failed attempt: it sleeps before the
/// next one, or returns `false` once the budget is spent.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    remaining: usize,
}

impl Backoff {
    pub fn new(attempts: usize) -> Self {
        Self {
            delay: INITIAL_DELAY,
            remaining: attempts.max(1),
        }
    }

    /// Delay before the next attempt, without jitter. `None` when no attempt is left.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return None;
        }
        let delay = self.delay;
        self.delay = (self.delay * 2).min(MAX_DELAY);
        Some(delay)
    }

    pub async fn wait(&mut self) -> bool {
        let Some(delay) = self.next_delay() else {
            return false;
        };
        let jitter = Duration::from_millis(rand::random::<u64>() % MAX_JITTER_MS);
        tokio::time::sleep(delay + jitter).await;
        true
    }
}

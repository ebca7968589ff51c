//! Absorb state machine: `Idle -> Absorbing -> Ready`.
//!
//! Replaces fixed waits with an explicit readiness check: copying only starts
//! once the destination reports the catalog it was told to serve, and the
//! tracker refuses to start a second copy while one is running.

use super::types::{AbsorbState, ControlError};

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct AbsorbTracker {
    state: AbsorbState,
}

impl AbsorbTracker {
    pub fn new() -> Self {
        Self {
            state: AbsorbState::Idle,
        }
    }

    pub fn state(&self) -> &AbsorbState {
        &self.state
    }

    pub fn is_absorbing(&self) -> bool {
        matches!(self.state, AbsorbState::Absorbing { .. })
    }

    pub fn begin(&mut self, dataset: &str, source: &str) -> Result<(), ControlError> {
        if let AbsorbState::Absorbing { dataset, source } = &self.state {
            return Err(ControlError::AlreadyAbsorbing {
                dataset: dataset.clone(),
                from: source.clone(),
            });
        }
        self.state = AbsorbState::Absorbing {
            dataset: dataset.to_string(),
            source: source.to_string(),
        };
        Ok(())
    }

    /// Marks the running copy as finished.
    pub fn finish(&mut self) {
        if let AbsorbState::Absorbing { dataset, source } = &self.state {
            self.state = AbsorbState::Ready {
                dataset: dataset.clone(),
                source: source.clone(),
            };
        }
    }

    /// Abandons the running copy.
    pub fn reset(&mut self) {
        self.state = AbsorbState::Idle;
    }
}

impl Default for AbsorbTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `check` every `interval` until it returns true or `deadline` elapses.
pub async fn wait_until_ready<F, Fut>(interval: Duration, deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let give_up = Instant::now() + deadline;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() + interval > give_up {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

//! Monotonic deadline timer

use std::time::{Duration, Instant};

use crate::Timer;

/// Timer backed by `std::time::Instant`
///
/// A timer that was never armed reports itself as expired.
#[derive(Debug, Clone, Default)]
pub struct MonotonicTimer {
    deadline: Option<Instant>,
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Duration {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}

impl Timer for MonotonicTimer {
    fn arm(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
    }

    fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => true,
        }
    }
}

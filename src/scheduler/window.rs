use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Dispatch timestamps inside the rolling quota window, oldest first.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    max_requests: usize,
    window: Duration,
    dispatched: VecDeque<Instant>,
}

impl WindowTracker {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            dispatched: VecDeque::with_capacity(config.max_requests),
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.dispatched.push_back(now);
    }

    /// Drop every timestamp at or before `now - window`.
    pub fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.dispatched.front().is_some_and(|at| *at <= cutoff) {
            self.dispatched.pop_front();
        }
    }

    pub fn count(&self) -> usize {
        self.dispatched.len()
    }

    pub fn can_admit(&self) -> bool {
        self.count() < self.max_requests
    }

    /// When the oldest tracked dispatch leaves the window, or `now` if nothing is tracked.
    pub fn next_free_at(&self, now: Instant) -> Instant {
        match self.dispatched.front() {
            Some(oldest) => *oldest + self.window,
            None => now,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}

//! Per-observer request throttling

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ObserverId;

/// Fixed-window request limiter keyed by observer.
///
/// Each observer may issue `max_requests` within one `window`. The window
/// opens on the observer's first request and restarts on the first request
/// after it has closed.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: HashMap<ObserverId, Window>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    used: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: HashMap::new(),
        }
    }

    /// Count one request from `observer_id` at `now`.
    ///
    /// On refusal returns how long until the observer's window reopens.
    pub fn check_at(&mut self, observer_id: &ObserverId, now: Instant) -> Result<(), Duration> {
        let window = self
            .windows
            .entry(observer_id.clone())
            .or_insert(Window {
                opened_at: now,
                used: 0,
            });

        let age = now.saturating_duration_since(window.opened_at);
        if age >= self.window {
            *window = Window {
                opened_at: now,
                used: 0,
            };
        }

        if window.used < self.max_requests {
            window.used += 1;
            Ok(())
        } else {
            Err(self.window.saturating_sub(age))
        }
    }

    pub fn check(&mut self, observer_id: &ObserverId) -> Result<(), Duration> {
        self.check_at(observer_id, Instant::now())
    }

    pub fn remove_observer(&mut self, observer_id: &ObserverId) {
        self.windows.remove(observer_id);
    }

    /// Forget observers whose window opened more than `stale_after` ago
    pub fn cleanup(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.opened_at) < stale_after);
    }

    pub fn tracked_observers(&self) -> usize {
        self.windows.len()
    }
}

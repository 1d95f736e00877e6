//! Request rate limiting
//!
//! A token bucket refilled in whole windows: `per_window` permits become
//! available at the start of each window and unused permits do not carry
//! over.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    per_window: usize,
    window: Duration,
    window_start: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(per_window: usize, window: Duration) -> Self {
        let per_window = per_window.max(1);
        Self {
            permits: Arc::new(Semaphore::new(per_window)),
            per_window,
            window,
            window_start: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// `requests` per second
    pub fn per_second(requests: usize) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }

    /// Wait until a request may be sent. The permit is consumed.
    pub async fn acquire(&self) {
        loop {
            self.refill().await;
            if let Ok(permit) = self.permits.try_acquire() {
                permit.forget();
                return;
            }
            let wait = {
                let start = self.window_start.lock().await;
                self.window.saturating_sub(start.elapsed())
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn refill(&self) {
        let mut start = self.window_start.lock().await;
        if start.elapsed() < self.window {
            return;
        }
        let missing = self.per_window.saturating_sub(self.permits.available_permits());
        if missing > 0 {
            self.permits.add_permits(missing);
        }
        *start = Instant::now();
    }
}

//! Sliding-window admission gate for outbound RPC calls.
//!
//! Enforces two local hard ceilings independent of upstream error
//! responses: calls per trailing second and calls per trailing minute.
//! `acquire()` suspends until a slot is available, so callers never
//! need to handle a rejection.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Sliding-window rate limiter over the trailing 60 seconds of call
/// timestamps.
///
/// Shared mutable state: the window lives behind a `tokio::sync::Mutex`
/// because slot computation must be atomic with the append, but the lock
/// is never held across a sleep.
pub struct RateLimiter {
    max_per_second: usize,
    max_per_minute: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given per-second and per-minute ceilings.
    pub fn new(max_per_second: usize, max_per_minute: usize) -> Self {
        Self {
            max_per_second: max_per_second.max(1),
            max_per_minute: max_per_minute.max(1),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Acquire one call slot, sleeping until the window has room.
    ///
    /// If the trailing-1s count is at the per-second cap, sleeps until the
    /// oldest of the most recent `max_per_second` timestamps leaves the 1s
    /// window; likewise for the 60s window. Every granted slot appends a
    /// timestamp.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();

                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= MINUTE {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                let mut wait = Duration::ZERO;

                if window.len() >= self.max_per_minute {
                    let oldest = window[window.len() - self.max_per_minute];
                    wait = wait.max(MINUTE.saturating_sub(now.duration_since(oldest)));
                }

                let second_count = window
                    .iter()
                    .rev()
                    .take_while(|t| now.duration_since(**t) < SECOND)
                    .count();
                if second_count >= self.max_per_second {
                    let oldest_recent = window[window.len() - self.max_per_second];
                    wait = wait.max(SECOND.saturating_sub(now.duration_since(oldest_recent)));
                }

                if wait.is_zero() {
                    window.push_back(now);
                    return;
                }
                wait
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limiter backoff");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of timestamps currently inside the trailing 60s window.
    pub async fn window_len(&self) -> usize {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= MINUTE {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }
}

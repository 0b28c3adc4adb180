use std::collections::VecDeque;
use std::time::Duration;

use log::info;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

const WINDOW: Duration = Duration::from_secs(60);
const SLEEP_MARGIN: Duration = Duration::from_millis(50);

/// Client-side sliding-window limiter: at most `max_per_minute` recorded
/// requests in any trailing 60-second window. One instance per run; the
/// request client calls `acquire_slot` before sending and `record` once a
/// response is obtained.
pub struct RateLimiter {
    timestamps: Mutex<VecDeque<Instant>>,
    max_per_minute: usize,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::with_capacity(max_per_minute)),
            max_per_minute,
        }
    }

    /// Block until fewer than `max_per_minute` requests sit in the trailing
    /// window. When full, sleeps until the oldest entry expires (plus a small
    /// margin), then re-evaluates.
    pub async fn acquire_slot(&self) {
        loop {
            let now = Instant::now();
            let mut ts = self.timestamps.lock().await;
            while ts.front().is_some_and(|&t| now - t >= WINDOW) {
                ts.pop_front();
            }
            if ts.len() < self.max_per_minute {
                return;
            }

            let oldest = *ts.front().expect("non-empty at capacity");
            let wait = (oldest + WINDOW).saturating_duration_since(now) + SLEEP_MARGIN;
            info!(
                "Rate limiter reached {}/min. Sleeping {:.1}s...",
                self.max_per_minute,
                wait.as_secs_f64()
            );
            drop(ts);
            sleep(wait).await;
        }
    }

    /// Record an issued request's timestamp.
    pub async fn record(&self) {
        self.timestamps.lock().await.push_back(Instant::now());
    }
}

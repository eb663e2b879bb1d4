use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitSettings;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed one-minute delivery quota.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<Window>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                count: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Takes one slot from the current window. Returns `false` when limiting
    /// is enabled and the quota is used up.
    pub async fn try_acquire(&self, settings: &RateLimitSettings) -> bool {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        if now.duration_since(window.started) >= WINDOW {
            window.count = 0;
            window.started = now;
        }
        if settings.enabled && window.count >= settings.max_per_minute {
            debug!(
                count = window.count,
                max = settings.max_per_minute,
                "rate limit reached"
            );
            return false;
        }
        window.count += 1;
        true
    }
}

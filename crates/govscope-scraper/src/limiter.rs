use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Paces outbound requests to a fixed budget. One instance is shared by
/// every worker; `acquire` hands out send slots in arrival order, so the
/// lock is held only long enough to reserve a slot and the wait itself
/// happens unlocked.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A rate of zero or below disables pacing entirely.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits until the caller may issue one request. Never fails; at worst
    /// it delays.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        sleep_until(slot).await;
    }
}

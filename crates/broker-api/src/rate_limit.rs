use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed-window limiter for one boundary operation (§5: "if a rate limiter
/// is configured for a boundary operation, requests exceeding the limit are
/// rejected ... before any state is mutated").
///
/// Deliberately simpler than a token-bucket: the window resets wholesale
/// every `window` rather than leaking continuously, which is adequate for
/// a per-operation cap and keeps the broker free of an extra crate.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            state: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Returns `true` if the call is admitted, `false` if the window's quota
    /// is exhausted.
    pub fn try_acquire(&self) -> bool {
        let mut guard = self.state.lock().expect("rate limiter mutex poisoned");
        let (window_start, count) = &mut *guard;
        let now = Instant::now();
        if now.duration_since(*window_start) >= self.window {
            *window_start = now;
            *count = 0;
        }
        if *count >= self.max_per_window {
            return false;
        }
        *count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_configured_quota_then_rejects() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}

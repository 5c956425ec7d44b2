// Request pacing for the feed API.
//
// Reddit's unauthenticated JSON endpoints tolerate roughly ten requests per
// minute per client. Both feed streams share one client, so the limiter
// spaces requests across streams and, after a 429, holds every caller until
// the feed's retry window has passed.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Shared pacing state. Cloning yields another handle to the same limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Pacing>>,
}

struct Pacing {
    /// Minimum spacing between requests
    interval: Duration,
    /// Earliest instant the next request may go out
    next_allowed: Option<Instant>,
}

impl RateLimiter {
    /// Allow at most `requests_per_minute` requests per minute.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self::with_interval(Duration::from_secs_f64(60.0 / f64::from(rpm)))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Pacing {
                interval,
                next_allowed: None,
            })),
        }
    }

    /// Wait for a request slot. The slot is reserved before sleeping, so
    /// concurrent callers queue up one interval apart.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut pacing = self.inner.lock().await;
            let now = Instant::now();
            let slot = match pacing.next_allowed {
                Some(t) if t > now => t,
                _ => now,
            };
            pacing.next_allowed = Some(slot + pacing.interval);
            slot
        };

        if wait_until > Instant::now() {
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Hold all callers for at least `delay` (e.g. after a 429).
    pub async fn pause_for(&self, delay: Duration) {
        let mut pacing = self.inner.lock().await;
        let until = Instant::now() + delay;
        if pacing.next_allowed.map_or(true, |t| t < until) {
            pacing.next_allowed = Some(until);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_minute_interval() {
        let limiter = RateLimiter::per_minute(10);
        let pacing = limiter.inner.try_lock().unwrap();
        assert_eq!(pacing.interval, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::with_interval(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_second_request_waits_one_interval() {
        let limiter = RateLimiter::with_interval(Duration::from_millis(200));
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(180),
            "Expected ~200ms delay, got {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_pause_holds_next_request() {
        let limiter = RateLimiter::with_interval(Duration::from_millis(1));
        limiter.pause_for(Duration::from_millis(150)).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(130));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = RateLimiter::with_interval(Duration::from_millis(150));
        let b = a.clone();
        a.acquire().await;
        let start = Instant::now();
        b.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(130));
    }
}

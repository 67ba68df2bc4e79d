//! Fixed-interval admission control for outbound API calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Minimum spacing between two calls against the same remote.
pub const DEFAULT_API_INTERVAL: Duration = Duration::from_millis(720);

/// Grants at most one permit per `period`. No bursts: a caller that arrives late does not bank
/// the time it missed.
///
/// Construct one per remote and share it through an `Arc`; every call site awaits
/// [`RateLimiter::acquire`] before touching the network.
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    next_permit: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_permit: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until the next permit is available. The lock is held while sleeping so concurrent
    /// callers queue up behind each other.
    pub async fn acquire(&self) {
        let mut next_permit = self.next_permit.lock().await;
        let now = Instant::now();
        let granted_at = match *next_permit {
            Some(at) if at > now => {
                tracing::trace!(wait_ms = (at - now).as_millis() as u64, "Pacing api call");
                sleep_until(at).await;
                at
            }
            _ => now,
        };
        *next_permit = Some(granted_at + self.period);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_API_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_permit_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(720));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_permits_are_spaced_by_period() {
        let limiter = RateLimiter::new(Duration::from_millis(720));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now() - start, Duration::from_millis(3 * 720));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_is_not_banked() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let resumed = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now() - resumed, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_paces_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();
        let mut granted = Vec::new();
        for task in tasks {
            granted.push(task.await.unwrap() - start);
        }
        granted.sort();
        assert_eq!(
            granted,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000)
            ]
        );
    }
}

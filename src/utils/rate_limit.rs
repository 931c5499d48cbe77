//! Token-bucket rate limiter used to throttle expensive per-connection
//! work (TLS handshakes) without rejecting bursts outright.

use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;
use tokio::sync::Mutex;

use super::clock;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared, cloneable token bucket. `rate` tokens are added per second, up
/// to `burst` capacity; `wait()` blocks until a token is available.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Bucket>>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: usize, burst: usize) -> Self {
        let burst = burst.max(1) as f64;
        RateLimiter {
            inner: Arc::new(Mutex::new(Bucket {
                tokens: burst,
                last_refill: clock::now(),
            })),
            rate_per_sec: rate_per_sec.max(1) as f64,
            burst,
        }
    }

    /// Wait until a token is available, then consume it.
    pub async fn wait(&self) {
        loop {
            let sleep_for = {
                let mut bucket = self.inner.lock().await;
                let now = clock::recent();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate_per_sec))
                }
            };

            match sleep_for {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_burst_immediately() {
        let limiter = RateLimiter::new(10, 5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn throttles_past_burst() {
        let limiter = RateLimiter::new(100, 1);
        limiter.wait().await;
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}

//! Token bucket shared by every outbound call to the primary provider

use crate::error::ResolutionFailure;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Continuous-refill token bucket: `capacity` tokens per `window`, never
/// more than `capacity` banked.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A zero capacity or window is bumped to the smallest usable value.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window = window.max(Duration::from_millis(1));
        Self {
            capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Take a token if one is available right now, otherwise report how long
    /// until one will be.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - bucket.tokens) / self.refill_per_sec,
            ))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Wait until a token is available, then consume it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.take() {
            tokio::time::sleep(wait).await;
        }
    }

    /// [`acquire`](Self::acquire) that gives up when `cancel` fires.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ResolutionFailure> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolutionFailure::Cancelled),
            _ = self.acquire() => Ok(()),
        }
    }

    /// Minimum wait for the next token, without consuming one.
    pub fn wait_time(&self) -> Duration {
        let tokens = self.available_tokens();
        if tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - tokens) / self.refill_per_sec)
        }
    }

    /// Tokens banked right now, refill included.
    pub fn available_tokens(&self) -> f64 {
        let bucket = self.bucket.lock();
        let elapsed = Instant::now()
            .saturating_duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_third_acquire_waits() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(limiter.available_tokens(), 3.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_time_does_not_consume() {
        let limiter = RateLimiter::per_minute(45);
        assert_eq!(limiter.wait_time(), Duration::ZERO);
        for _ in 0..45 {
            assert!(limiter.try_acquire());
        }
        let wait = limiter.wait_time();
        assert!(wait > Duration::from_millis(1300) && wait <= Duration::from_millis(1334));
        assert_eq!(limiter.wait_time(), wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(4, Duration::from_secs(1)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 4 banked, 4 more at 4/s.
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(limiter.available_tokens() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let limiter = RateLimiter::new(1, Duration::from_secs(3600));
        limiter.acquire().await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = limiter.acquire_with_cancel(&cancel).await;
        assert_eq!(outcome, Err(ResolutionFailure::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

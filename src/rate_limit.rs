//! Rate limiting.
//!
//! Two limiters live here:
//!
//! - [`TokenBucket`] paces outbound LLM calls from the indexer's worker pool.
//!   It is shared behind an `Arc` and guarded by a mutex; callers sleep
//!   outside the lock.
//! - [`ClientLimiter`] caps expensive API requests per client over a window.
//!
//! Both take an explicit `now` in their core methods so tests can drive time.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Longest wait a single reservation can be handed.
pub const MAX_BUCKET_WAIT: Duration = Duration::from_secs(3600);

/// Token bucket: `rate` tokens per second, at most `burst` stored.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self::starting_at(rate, burst, Instant::now())
    }

    fn starting_at(rate: f64, burst: u32, now: Instant) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: now,
            }),
        }
    }

    /// Takes one token and returns how long the caller must wait before
    /// proceeding.
    ///
    /// The balance may go negative: each caller that arrives while the bucket
    /// is empty queues behind the ones already waiting, so waits grow by
    /// `1 / rate` per reservation. Waits are capped at [`MAX_BUCKET_WAIT`].
    pub fn reserve_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last = now;

        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(-state.tokens / self.rate)
            .unwrap_or(MAX_BUCKET_WAIT)
            .min(MAX_BUCKET_WAIT)
    }

    /// Waits until a token is available.
    pub async fn acquire(&self) {
        let wait = self.reserve_at(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait + Duration::from_millis(10)).await;
        }
    }
}

/// Outcome of a [`ClientLimiter`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Rejected; retry after this many whole seconds (at least 1).
    Limited { retry_after_secs: u64 },
}

/// Per-client request budget over a rolling window.
///
/// Each admitted request records `cost` units. A request is rejected when
/// the units recorded within the last `window` plus its own cost would
/// exceed `limit`.
pub struct ClientLimiter {
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl ClientLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, client: &str, cost: u32) -> Admission {
        self.check_at(client, cost, Instant::now())
    }

    pub fn check_at(&self, client: &str, cost: u32, now: Instant) -> Admission {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        // Forget idle clients so the map stays bounded.
        clients.retain(|_, log| {
            log.back()
                .map(|last| now.saturating_duration_since(*last) < self.window * 2)
                .unwrap_or(false)
        });

        let log = clients.entry(client.to_string()).or_default();
        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() as u64 + u64::from(cost) > u64::from(self.limit) {
            let retry_after_secs = match log.front() {
                Some(oldest) => {
                    let remaining = self
                        .window
                        .saturating_sub(now.saturating_duration_since(*oldest));
                    remaining.as_secs() + 1
                }
                None => self.window.as_secs(),
            };
            return Admission::Limited {
                retry_after_secs: retry_after_secs.max(1),
            };
        }

        for _ in 0..cost {
            log.push_back(now);
        }
        Admission::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_allows_burst_then_waits() {
        let start = Instant::now();
        let bucket = TokenBucket::starting_at(10.0, 3, start);
        for _ in 0..3 {
            assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        }
        let wait = bucket.reserve_at(start);
        assert!((wait.as_secs_f64() - 0.1).abs() < 1e-9, "wait was {:?}", wait);
    }

    #[test]
    fn bucket_refills_over_time() {
        let start = Instant::now();
        let bucket = TokenBucket::starting_at(2.0, 1, start);
        assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        assert!(bucket.reserve_at(start) > Duration::ZERO);
        // One second at 2 tokens/s refills past the burst cap of 1.
        assert_eq!(
            bucket.reserve_at(start + Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn queued_reservations_wait_in_turn() {
        let start = Instant::now();
        let bucket = TokenBucket::starting_at(1.0, 1, start);
        assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        let waits: Vec<u64> = (0..5)
            .map(|_| bucket.reserve_at(start).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 3, 4, 5]);

        // After 2s two queued slots have been paid off.
        let later = bucket.reserve_at(start + Duration::from_secs(2));
        assert_eq!(later, Duration::from_secs(4));
    }

    #[test]
    fn tiny_rates_wait_the_maximum_instead_of_panicking() {
        let start = Instant::now();
        let bucket = TokenBucket::starting_at(1e-300, 1, start);
        assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        assert_eq!(bucket.reserve_at(start), MAX_BUCKET_WAIT);
    }

    #[tokio::test]
    async fn acquire_returns_immediately_with_tokens() {
        let bucket = TokenBucket::new(1000.0, 5);
        let started = Instant::now();
        bucket.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn client_limiter_charges_cost_units() {
        let limiter = ClientLimiter::new(10, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.check_at("1.2.3.4", 3, now), Admission::Allowed);
        }
        // 9 units used; another 3 would exceed 10.
        match limiter.check_at("1.2.3.4", 3, now + Duration::from_secs(20)) {
            Admission::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 41),
            other => panic!("expected limit, got {:?}", other),
        }
        // Other clients are independent.
        assert_eq!(limiter.check_at("5.6.7.8", 3, now), Admission::Allowed);
    }

    #[test]
    fn client_limiter_recovers_after_window() {
        let limiter = ClientLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.check_at("c", 3, now), Admission::Allowed);
        assert!(matches!(
            limiter.check_at("c", 1, now),
            Admission::Limited { .. }
        ));
        assert_eq!(
            limiter.check_at("c", 3, now + Duration::from_secs(60)),
            Admission::Allowed
        );
    }

    #[test]
    fn cost_above_limit_is_always_rejected() {
        let limiter = ClientLimiter::new(2, Duration::from_secs(10));
        assert_eq!(
            limiter.check_at("c", 3, Instant::now()),
            Admission::Limited {
                retry_after_secs: 10
            }
        );
    }
}

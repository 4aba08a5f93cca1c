//! Post-number allocation.
//!
//! Every thread and reply draws its number from the single `post_number`
//! counter record. The counter is advanced with a read / compare-and-swap
//! pair and retried with jittered exponential backoff; when the store stays
//! unavailable the allocator degrades to a clock-based number instead of
//! failing the post.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domains::{AppError, CounterStore, PostNumber, Result};
use rand::Rng;
use tracing::{debug, warn};

/// Name of the counter record in the `counters` collection.
pub const POST_COUNTER: &str = "post_number";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

/// A freshly allocated post number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Issued by the counter transaction; unique and ordered.
    Primary(PostNumber),
    /// Issued by the clock fallback; collisions are possible but rare.
    Degraded(PostNumber),
}

impl Allocation {
    pub fn number(self) -> PostNumber {
        match self {
            Allocation::Primary(n) | Allocation::Degraded(n) => n,
        }
    }

    pub fn is_degraded(self) -> bool {
        matches!(self, Allocation::Degraded(_))
    }
}

pub struct IdentifierAllocator {
    counters: Arc<dyn CounterStore>,
    policy: RetryPolicy,
    last_fallback: AtomicU64,
}

impl IdentifierAllocator {
    pub fn new(counters: Arc<dyn CounterStore>, policy: RetryPolicy) -> Self {
        Self {
            counters,
            policy,
            last_fallback: AtomicU64::new(0),
        }
    }

    /// Issues the next post number. Never fails; see [`Allocation`].
    pub async fn allocate(&self) -> Allocation {
        let mut attempt = 0;

        loop {
            match self.try_advance().await {
                Ok(number) => return Allocation::Primary(number),
                Err(err) => {
                    attempt += 1;

                    if attempt >= self.policy.max_attempts {
                        let number = self.clock_fallback();
                        warn!(
                            error = %err,
                            attempts = attempt,
                            post_number = number.get(),
                            "DegradedAllocation: counter unavailable, using clock fallback"
                        );
                        return Allocation::Degraded(number);
                    }

                    let delay = self.policy.delay_for(attempt - 1);
                    debug!(
                        error = %err,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying post number allocation"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_advance(&self) -> Result<PostNumber> {
        let current = self.counters.read(POST_COUNTER).await?;
        let next = current.unwrap_or(0) + 1;

        if self
            .counters
            .compare_and_swap(POST_COUNTER, current, next)
            .await?
        {
            Ok(PostNumber(next))
        } else {
            Err(AppError::Contention(format!(
                "counter moved past {}",
                current.unwrap_or(0)
            )))
        }
    }

    /// Microseconds since the epoch, bumped past the previous fallback so
    /// this process never hands out the same degraded number twice.
    fn clock_fallback(&self) -> PostNumber {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut previous = self.last_fallback.load(Ordering::SeqCst);

        loop {
            let candidate = now.max(previous + 1);
            match self.last_fallback.compare_exchange_weak(
                previous,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return PostNumber(candidate),
                Err(actual) => previous = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::MockCounterStore;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_first_allocation_starts_at_one() {
        let mut store = MockCounterStore::new();
        store.expect_read().returning(|_| Ok(None));
        store
            .expect_compare_and_swap()
            .withf(|name, expected, new| name == POST_COUNTER && expected.is_none() && *new == 1)
            .times(1)
            .returning(|_, _, _| Ok(true));

        let allocator = IdentifierAllocator::new(Arc::new(store), fast_policy(3));
        assert_eq!(allocator.allocate().await, Allocation::Primary(PostNumber(1)));
    }

    #[tokio::test]
    async fn test_conflict_rereads_and_retries() {
        let mut store = MockCounterStore::new();
        store.expect_read().times(1).returning(|_| Ok(Some(4)));
        store.expect_read().times(1).returning(|_| Ok(Some(5)));
        store
            .expect_compare_and_swap()
            .withf(|_, expected, _| *expected == Some(4))
            .times(1)
            .returning(|_, _, _| Ok(false));
        store
            .expect_compare_and_swap()
            .withf(|_, expected, new| *expected == Some(5) && *new == 6)
            .times(1)
            .returning(|_, _, _| Ok(true));

        let allocator = IdentifierAllocator::new(Arc::new(store), fast_policy(3));
        assert_eq!(allocator.allocate().await, Allocation::Primary(PostNumber(6)));
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_instead_of_failing() {
        let mut store = MockCounterStore::new();
        store
            .expect_read()
            .times(3)
            .returning(|_| Err(AppError::Internal("store offline".into())));

        let allocator = IdentifierAllocator::new(Arc::new(store), fast_policy(3));
        let first = allocator.allocate().await;
        assert!(first.is_degraded());
        assert!(first.number().get() > 1_000_000);
    }

    #[tokio::test]
    async fn test_degraded_numbers_strictly_increase() {
        let mut store = MockCounterStore::new();
        store
            .expect_read()
            .returning(|_| Err(AppError::Internal("store offline".into())));

        let allocator = IdentifierAllocator::new(Arc::new(store), fast_policy(1));
        let a = allocator.allocate().await.number();
        let b = allocator.allocate().await.number();
        assert!(b > a);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(10), Duration::from_millis(250));
    }
}

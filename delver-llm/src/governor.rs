//! Rate-limit governor
//!
//! A process-wide shared resource with two knobs: minimum inter-request
//! spacing per key (requests-per-minute inverted) and a global concurrency
//! ceiling. Each key (model id or external-service name) has its own pacing
//! clock; all keys share the concurrency pool. Waiters on the same key are
//! FIFO because the pacing sleep happens while the key's clock mutex is
//! held.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct RateLimitGovernor {
    permits: Arc<Semaphore>,
    min_interval: Option<Duration>,
    clocks: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl RateLimitGovernor {
    /// `requests_per_minute <= 0` disables pacing; the concurrency ceiling
    /// always applies.
    pub fn new(max_concurrent: usize, requests_per_minute: i64) -> Self {
        let min_interval = if requests_per_minute > 0 {
            Some(Duration::from_secs_f64(60.0 / requests_per_minute as f64))
        } else {
            None
        };
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            min_interval,
            clocks: Mutex::new(HashMap::new()),
        }
    }

    /// Suspend until a concurrency slot is free and the key's inter-request
    /// spacing constraint is satisfied. The returned permit releases the
    /// slot on drop.
    pub async fn acquire(&self, key: &str) -> GovernorPermit {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("governor semaphore is never closed");

        if let Some(min_interval) = self.min_interval {
            let clock = {
                let mut clocks = self.clocks.lock().await;
                clocks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(None)))
                    .clone()
            };

            let mut last_request = clock.lock().await;
            if let Some(last) = *last_request {
                let elapsed = last.elapsed();
                if elapsed < min_interval {
                    let wait = min_interval - elapsed;
                    debug!(
                        key = key,
                        wait_ms = wait.as_millis() as u64,
                        "Pacing: sleeping to enforce minimum interval"
                    );
                    sleep(wait).await;
                }
            }
            *last_request = Some(Instant::now());
        }

        GovernorPermit { _permit: permit }
    }

    /// Number of free concurrency slots (for diagnostics and tests)
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// RAII guard for a governor slot
#[derive(Debug)]
pub struct GovernorPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enforces_per_key_spacing() {
        let governor = RateLimitGovernor::new(4, 60); // 1s between requests

        let start = Instant::now();
        let p1 = governor.acquire("model-a").await;
        drop(p1);
        let p2 = governor.acquire("model-a").await;
        drop(p2);

        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_have_independent_clocks() {
        let governor = RateLimitGovernor::new(4, 60);

        let start = Instant::now();
        let p1 = governor.acquire("model-a").await;
        drop(p1);
        let p2 = governor.acquire("model-b").await;
        drop(p2);

        // Different keys do not pace each other.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn concurrency_ceiling_is_shared() {
        let governor = Arc::new(RateLimitGovernor::new(2, -1));

        let p1 = governor.acquire("a").await;
        let _p2 = governor.acquire("b").await;
        assert_eq!(governor.available_permits(), 0);

        drop(p1);
        assert_eq!(governor.available_permits(), 1);
    }

    #[tokio::test]
    async fn pacing_disabled_when_rpm_non_positive() {
        let governor = RateLimitGovernor::new(1, -1);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            let _p = governor.acquire("model").await;
        }
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }
}

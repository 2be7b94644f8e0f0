//! Per-domain admission control
//!
//! Bounds concurrent fetches per host and imposes a cool-down between
//! consecutive fetches of the same host, under a global ceiling on total
//! concurrent fetches. Acquisition order: domain slot, cool-down wait,
//! global slot. Dropping the permit stamps the domain's last-completion
//! time regardless of fetch outcome. tokio semaphores queue waiters FIFO.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

#[derive(Clone)]
struct DomainEntry {
    semaphore: Arc<Semaphore>,
    last_completion: Arc<StdMutex<Option<Instant>>>,
}

pub struct AdmissionController {
    global: Arc<Semaphore>,
    per_domain_limit: usize,
    cool_down: Duration,
    domains: Mutex<HashMap<String, DomainEntry>>,
}

impl AdmissionController {
    pub fn new(global_limit: usize, per_domain_limit: usize, cool_down: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_domain_limit,
            cool_down,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Registered domain of a URL: the lowercased host, or the raw input
    /// when it does not parse as an absolute URL.
    pub fn domain_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_else(|| url.to_ascii_lowercase())
    }

    async fn entry_for(&self, domain: &str) -> DomainEntry {
        let mut domains = self.domains.lock().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainEntry {
                semaphore: Arc::new(Semaphore::new(self.per_domain_limit)),
                last_completion: Arc::new(StdMutex::new(None)),
            })
            .clone()
    }

    /// Suspend until this URL's host has a free slot, its cool-down has
    /// elapsed, and a global slot is free.
    pub async fn admit(&self, url: &str) -> AdmissionPermit {
        let domain = Self::domain_of(url);
        let entry = self.entry_for(&domain).await;

        let domain_permit = entry
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("domain semaphore is never closed");

        loop {
            let wait = {
                let last = entry
                    .last_completion
                    .lock()
                    .expect("last-completion lock poisoned");
                match *last {
                    Some(at) => {
                        let elapsed = at.elapsed();
                        if elapsed < self.cool_down {
                            Some(self.cool_down - elapsed)
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            };
            match wait {
                Some(duration) => {
                    debug!(
                        domain = domain.as_str(),
                        wait_ms = duration.as_millis() as u64,
                        "Respecting per-domain cool-down"
                    );
                    sleep(duration).await;
                }
                None => break,
            }
        }

        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore is never closed");

        AdmissionPermit {
            _domain: domain_permit,
            _global: global_permit,
            last_completion: entry.last_completion.clone(),
        }
    }

    pub fn available_global_permits(&self) -> usize {
        self.global.available_permits()
    }
}

/// RAII guard for an admitted fetch. Dropping it records the completion
/// time for the domain, whatever the fetch outcome was.
pub struct AdmissionPermit {
    _domain: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
    last_completion: Arc<StdMutex<Option<Instant>>>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut last = self
            .last_completion
            .lock()
            .expect("last-completion lock poisoned");
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn domain_extraction() {
        assert_eq!(
            AdmissionController::domain_of("https://Example.COM/path?q=1"),
            "example.com"
        );
        assert_eq!(
            AdmissionController::domain_of("https://sub.site.org/a.pdf"),
            "sub.site.org"
        );
        assert_eq!(AdmissionController::domain_of("not a url"), "not a url");
    }

    #[tokio::test(start_paused = true)]
    async fn cool_down_separates_consecutive_fetches() {
        let controller = AdmissionController::new(8, 1, Duration::from_secs(2));

        let started = Instant::now();
        let permit = controller.admit("https://example.com/a").await;
        drop(permit);

        let _second = controller.admit("https://example.com/b").await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cool_down_is_per_domain() {
        let controller = AdmissionController::new(8, 1, Duration::from_secs(5));

        let permit = controller.admit("https://one.example/a").await;
        drop(permit);

        let started = Instant::now();
        let _other = controller.admit("https://two.example/b").await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn per_domain_concurrency_never_exceeds_limit() {
        let controller = Arc::new(AdmissionController::new(16, 2, Duration::ZERO));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let controller = controller.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = controller
                    .admit(&format!("https://example.com/{}", i))
                    .await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn global_limit_bounds_total_concurrency() {
        let controller = Arc::new(AdmissionController::new(2, 8, Duration::ZERO));

        let p1 = controller.admit("https://a.example/1").await;
        let _p2 = controller.admit("https://b.example/1").await;
        assert_eq!(controller.available_global_permits(), 0);

        drop(p1);
        assert_eq!(controller.available_global_permits(), 1);
    }
}

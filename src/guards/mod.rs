//! In-memory TTL guards.
//!
//! These suppress duplicate side effects inside a short window. They are a
//! latency optimization only: they do not survive a restart and are not shared
//! between instances. The guarded conditional updates in the database remain
//! the source of truth for every status transition.
//!
//! Eviction is lazy: each insertion schedules its own removal on the tokio
//! runtime instead of running a periodic sweep.
//!
//! [`RateLimiter`] caps webhook traffic per client address on top of a keyed
//! `governor` limiter.

use governor::clock::{Clock, DefaultClock};
use governor::Quota;
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// A keyed membership set whose entries expire after `ttl`.
#[derive(Clone)]
pub struct TtlGuard<K> {
    name: &'static str,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<K, Instant>>>,
}

impl<K> TtlGuard<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert `key` unless a live entry already exists.
    ///
    /// Returns true when the caller now owns the key.
    pub fn try_acquire(&self, key: K) -> bool {
        let now = Instant::now();
        {
            let mut entries = lock(&self.entries);
            if let Some(inserted) = entries.get(&key) {
                if now.duration_since(*inserted) < self.ttl {
                    debug!("{} guard hit for {:?}", self.name, key);
                    return false;
                }
            }
            entries.insert(key.clone(), now);
        }

        self.schedule_eviction(key, now);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries)
            .get(key)
            .map(|inserted| inserted.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    pub fn release(&self, key: &K) {
        lock(&self.entries).remove(key);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schedule_eviction(&self, key: K, inserted: Instant) {
        let entries = Arc::downgrade(&self.entries);
        let ttl = self.ttl;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Some(entries) = entries.upgrade() {
                    let mut entries = lock(&entries);
                    // A release + re-acquire in the meantime owns a newer entry.
                    if entries.get(&key) == Some(&inserted) {
                        entries.remove(&key);
                    }
                }
            });
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Per-address request quota: `max_requests` per `window`, replenished
/// evenly across the window.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<governor::DefaultKeyedRateLimiter<IpAddr>>,
    clock: DefaultClock,
}

/// Idle addresses are swept once the key store grows past this.
const RETAIN_THRESHOLD: usize = 10_000;

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: Arc::new(governor::RateLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    pub fn check(&self, addr: IpAddr) -> RateDecision {
        let decision = match self.limiter.check_key(&addr) {
            Ok(()) => RateDecision::Allowed,
            Err(not_until) => RateDecision::Limited {
                retry_after: not_until.wait_time_from(self.clock.now()),
            },
        };

        if self.limiter.len() > RETAIN_THRESHOLD {
            self.limiter.retain_recent();
        }

        decision
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded maps hold plain data, so a poisoned lock is still usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_once_within_ttl() {
        let guard = TtlGuard::new("test", Duration::from_secs(60));
        assert!(guard.try_acquire("meeting-1".to_string()));
        assert!(!guard.try_acquire("meeting-1".to_string()));
        assert!(guard.try_acquire("meeting-2".to_string()));
        assert!(guard.contains(&"meeting-1".to_string()));
        assert_eq!(guard.len(), 2);
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let guard = TtlGuard::new("test", Duration::from_secs(60));
        assert!(guard.try_acquire("msg".to_string()));
        guard.release(&"msg".to_string());
        assert!(!guard.contains(&"msg".to_string()));
        assert!(guard.try_acquire("msg".to_string()));
    }

    #[tokio::test]
    async fn test_entries_are_evicted_after_ttl() {
        let guard = TtlGuard::new("test", Duration::from_millis(50));
        assert!(guard.try_acquire(7u32));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(guard.is_empty());
        assert!(guard.try_acquire(7u32));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let guard = TtlGuard::new("test", Duration::from_secs(60));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move { guard.try_acquire("same") }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_caps_requests_per_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let addr: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..3 {
            assert_eq!(limiter.check(addr), RateDecision::Allowed);
        }
        match limiter.check(addr) {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(20));
            }
            other => panic!("expected a limit, got {:?}", other),
        }

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(matches!(limiter.check(other), RateDecision::Allowed));
    }

    #[test]
    fn test_rate_limiter_zero_quota_still_admits_one() {
        let limiter = RateLimiter::new(Duration::ZERO, 0);
        let addr: IpAddr = "10.0.0.3".parse().unwrap();
        assert_eq!(limiter.check(addr), RateDecision::Allowed);
    }

    #[tokio::test]
    async fn test_rate_limiter_resets_after_window() {
        let limiter = RateLimiter::new(Duration::from_millis(50), 1);
        let addr: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(matches!(limiter.check(addr), RateDecision::Allowed));
        assert!(matches!(limiter.check(addr), RateDecision::Limited { .. }));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(limiter.check(addr), RateDecision::Allowed));
    }
}

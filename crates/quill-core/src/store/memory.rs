//! In-process lease store for tests and single-process deployments.
//!
//! Mirrors the backend contract with a mutex-guarded map: TTLs expire
//! lazily on access (the way Redis makes an expired key indistinguishable
//! from an absent one), and the wake channel is a condvar-signaled queue
//! per resource.
//!
//! The `fail_all` switch makes every operation return
//! [`StoreError::Unavailable`], which is how renewal failure and lease
//! lapse are exercised without a network partition harness.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{LeaseStore, StoreError};

#[derive(Debug)]
struct Lease {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    leases: HashMap<String, Lease>,
    wakes: HashMap<String, VecDeque<()>>,
}

/// Mutex-backed [`LeaseStore`] with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    inner: Mutex<Inner>,
    wake_cv: Condvar,
    fail_all: AtomicBool,
}

impl MemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every subsequent operation to fail, simulating an unreachable
    /// backend. Pass `false` to heal the store again.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("fault injection".to_string()));
        }
        Ok(())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("lease store mutex poisoned".to_string()))
    }
}

fn live_lease<'a>(inner: &'a Inner, key: &str, now: Instant) -> Option<&'a Lease> {
    inner
        .leases
        .get(key)
        .filter(|lease| lease.expires_at > now)
}

impl LeaseStore for MemoryLeaseStore {
    fn try_set_lease(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut inner = self.lock_inner()?;

        if live_lease(&inner, key, now).is_some() {
            return Ok(false);
        }

        inner.leases.insert(
            key.to_string(),
            Lease {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn extend_lease(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut inner = self.lock_inner()?;

        let matches = live_lease(&inner, key, now).is_some_and(|lease| lease.token == token);
        if !matches {
            return Ok(false);
        }

        if let Some(lease) = inner.leases.get_mut(key) {
            lease.expires_at = now + ttl;
        }
        Ok(true)
    }

    fn release_lease(&self, key: &str, wake_key: &str, token: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut inner = self.lock_inner()?;

        let matches = live_lease(&inner, key, now).is_some_and(|lease| lease.token == token);
        if !matches {
            return Ok(false);
        }

        inner.leases.remove(key);
        inner
            .wakes
            .entry(wake_key.to_string())
            .or_default()
            .push_back(());
        self.wake_cv.notify_all();
        Ok(true)
    }

    fn await_wake(&self, wake_key: &str, timeout: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock_inner()?;

        loop {
            if let Some(queue) = inner.wakes.get_mut(wake_key)
                && queue.pop_front().is_some()
            {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }

            let (guard, result) = self
                .wake_cv
                .wait_timeout(inner, remaining)
                .map_err(|_| StoreError::Unavailable("lease store mutex poisoned".to_string()))?;
            inner = guard;
            if result.timed_out() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryLeaseStore;
    use crate::store::LeaseStore;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const TTL: Duration = Duration::from_millis(80);

    #[test]
    fn second_set_fails_while_lease_is_live() {
        let store = MemoryLeaseStore::new();
        assert!(store.try_set_lease("lock:a", "t1", TTL).expect("set"));
        assert!(!store.try_set_lease("lock:a", "t2", TTL).expect("set"));
    }

    #[test]
    fn expired_lease_counts_as_absent() {
        let store = MemoryLeaseStore::new();
        assert!(store.try_set_lease("lock:a", "t1", TTL).expect("set"));
        thread::sleep(TTL + Duration::from_millis(20));
        assert!(store.try_set_lease("lock:a", "t2", TTL).expect("set"));
    }

    #[test]
    fn extend_requires_matching_token() {
        let store = MemoryLeaseStore::new();
        assert!(store.try_set_lease("lock:a", "t1", TTL).expect("set"));
        assert!(store.extend_lease("lock:a", "t1", TTL).expect("extend"));
        assert!(!store.extend_lease("lock:a", "other", TTL).expect("extend"));
    }

    #[test]
    fn release_with_stale_token_leaves_successor_lease() {
        let store = MemoryLeaseStore::new();
        assert!(store.try_set_lease("lock:a", "t1", TTL).expect("set"));
        thread::sleep(TTL + Duration::from_millis(20));
        assert!(store.try_set_lease("lock:a", "t2", TTL).expect("set"));

        assert!(!store
            .release_lease("lock:a", "lock:wait:a", "t1")
            .expect("release"));
        assert!(!store.try_set_lease("lock:a", "t3", TTL).expect("set"));
    }

    #[test]
    fn release_wakes_a_blocked_waiter() {
        let store = Arc::new(MemoryLeaseStore::new());
        assert!(store.try_set_lease("lock:a", "t1", TTL).expect("set"));

        let waiter_store = Arc::clone(&store);
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            waiter_store
                .await_wake("lock:wait:a", Duration::from_secs(2))
                .expect("await");
            started.elapsed()
        });

        thread::sleep(Duration::from_millis(30));
        assert!(store
            .release_lease("lock:a", "lock:wait:a", "t1")
            .expect("release"));

        let waited = waiter.join().expect("join waiter");
        assert!(waited < Duration::from_secs(1), "waiter should wake early");
    }

    #[test]
    fn fault_injection_fails_every_operation() {
        let store = MemoryLeaseStore::new();
        store.fail_all(true);
        assert!(store.try_set_lease("lock:a", "t1", TTL).is_err());
        assert!(store.extend_lease("lock:a", "t1", TTL).is_err());

        store.fail_all(false);
        assert!(store.try_set_lease("lock:a", "t1", TTL).expect("set"));
    }
}

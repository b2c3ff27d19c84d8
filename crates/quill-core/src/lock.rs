//! Lease-based distributed lock with automatic renewal.
//!
//! A [`LeaseLock`] is cooperative mutual exclusion across independent
//! worker processes, coordinated only through a shared key-value store.
//! Acquisition is an atomic set-if-absent race with a TTL; a background
//! renewal thread keeps the lease alive while the holder works, and lets
//! it lapse the instant the holder stops renewing (crash, long pause,
//! partition).
//!
//! The lock cannot preempt anyone. Losing the lease — renewal failing, or
//! an explicit release — fires a one-shot [`CancellationSignal`] that the
//! critical section must observe before committing side effects. The
//! authoritative correctness boundary stays with the database transaction;
//! the lease exists to avoid wasted duplicate work.
//!
//! One instance covers exactly one critical-section attempt. Instances are
//! never reused across acquisitions; the fencing token is minted once per
//! instance and proves ownership on every renew and release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::store::{LeaseStore, StoreError, lease_key, wake_key};

/// Lifecycle of a [`LeaseLock`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Created, no acquisition attempted yet.
    Unacquired,
    /// Acquisition succeeded and the lease is believed live.
    Held,
    /// Explicitly released, or abandoned after a failed renewal.
    Released,
}

/// Timing knobs for a lease lock.
///
/// `renewal_interval` must stay well below `lease_duration` so a lease
/// survives a couple of missed renewals before lapsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// TTL written on acquire and on every renewal.
    pub lease_duration: Duration,
    /// Period of the background renewal thread.
    pub renewal_interval: Duration,
    /// Ceiling on a single blocking wait for the wake channel.
    pub wait_poll_ceiling: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            renewal_interval: Duration::from_secs(10),
            wait_poll_ceiling: Duration::from_secs(1),
        }
    }
}

/// One-shot "I am no longer exclusive" notification.
///
/// Cloneable and cheap to poll. Fires at most once per lock instance,
/// on whichever comes first of explicit release or renewal failure.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    fired: Arc<AtomicBool>,
}

impl CancellationSignal {
    /// A fresh, unfired signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when exclusivity may no longer hold.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Fire the signal. Returns `true` only for the first call.
    pub(crate) fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }
}

struct RenewalHandle {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// A named, TTL-bounded mutual-exclusion handle.
pub struct LeaseLock<S: LeaseStore> {
    store: Arc<S>,
    lease_key: String,
    wake_key: String,
    token: String,
    settings: LockSettings,
    state: LockState,
    held: Arc<AtomicBool>,
    signal: CancellationSignal,
    renewal: Option<RenewalHandle>,
}

impl<S: LeaseStore> LeaseLock<S> {
    /// Create an unacquired lock for `resource_key` with a fresh fencing token.
    #[must_use]
    pub fn new(store: Arc<S>, resource_key: &str, settings: LockSettings) -> Self {
        Self {
            store,
            lease_key: lease_key(resource_key),
            wake_key: wake_key(resource_key),
            token: format!("{:032x}", rand::random::<u128>()),
            settings,
            state: LockState::Unacquired,
            held: Arc::new(AtomicBool::new(false)),
            signal: CancellationSignal::new(),
            renewal: None,
        }
    }

    /// The fencing token minted for this instance.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The cancellation signal observed by critical-section code.
    #[must_use]
    pub const fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Current lifecycle state, reflecting renewal-thread abandonment.
    #[must_use]
    pub fn state(&self) -> LockState {
        if self.state == LockState::Held && !self.held.load(Ordering::SeqCst) {
            LockState::Released
        } else {
            self.state
        }
    }

    /// Acquire the lease, blocking up to `deadline`.
    ///
    /// Returns `Ok(false)` when the deadline is exhausted without winning
    /// the set-if-absent race. Contention is not an error; callers decide
    /// whether to retry at a higher level.
    ///
    /// # Errors
    ///
    /// Propagates store failures encountered while attempting or waiting.
    pub fn acquire(&mut self, deadline: Duration) -> Result<bool, StoreError> {
        if self.state != LockState::Unacquired {
            warn!(key = %self.lease_key, "acquire on a used lock instance");
            return Ok(false);
        }

        let deadline_at = Instant::now() + deadline;
        loop {
            if self
                .store
                .try_set_lease(&self.lease_key, &self.token, self.settings.lease_duration)?
            {
                self.mark_held();
                return Ok(true);
            }

            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(key = %self.lease_key, "acquire deadline exhausted");
                return Ok(false);
            }

            // Stale wake tokens are deliberately not cleared first; the
            // worst case is one extra iteration of the set-if-absent race.
            self.store
                .await_wake(&self.wake_key, remaining.min(self.settings.wait_poll_ceiling))?;
        }
    }

    /// Single non-blocking acquisition attempt.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn try_acquire(&mut self) -> Result<bool, StoreError> {
        if self.state != LockState::Unacquired {
            warn!(key = %self.lease_key, "try_acquire on a used lock instance");
            return Ok(false);
        }

        if self
            .store
            .try_set_lease(&self.lease_key, &self.token, self.settings.lease_duration)?
        {
            self.mark_held();
            return Ok(true);
        }
        Ok(false)
    }

    /// Release the lease.
    ///
    /// Stops the renewal thread and fires the cancellation signal, then
    /// deletes the stored lease only if it still carries this instance's
    /// token. `Ok(false)` means the lease had already lapsed — possibly
    /// reacquired by another holder — and was left untouched. That is
    /// expected under latency, not an error.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the lease then lapses by TTL on its own.
    pub fn release(&mut self) -> Result<bool, StoreError> {
        if self.state != LockState::Held {
            return Ok(false);
        }
        self.state = LockState::Released;

        self.stop_renewal();
        self.signal.fire();

        if !self.held.swap(false, Ordering::SeqCst) {
            // The renewal thread already abandoned the lease.
            return Ok(false);
        }

        let released = self
            .store
            .release_lease(&self.lease_key, &self.wake_key, &self.token)?;
        if released {
            debug!(key = %self.lease_key, "lease released");
        } else {
            warn!(key = %self.lease_key, "lease already lapsed before release");
        }
        Ok(released)
    }

    fn mark_held(&mut self) {
        self.state = LockState::Held;
        self.held.store(true, Ordering::SeqCst);
        self.start_renewal();
        debug!(key = %self.lease_key, token = %self.token, "lease acquired");
    }

    fn start_renewal(&mut self) {
        let (stop, stop_rx) = mpsc::channel();
        let store = Arc::clone(&self.store);
        let key = self.lease_key.clone();
        let token = self.token.clone();
        let settings = self.settings;
        let held = Arc::clone(&self.held);
        let signal = self.signal.clone();

        let thread = thread::spawn(move || {
            renewal_loop(&store, &key, &token, settings, &held, &signal, &stop_rx);
        });
        self.renewal = Some(RenewalHandle { stop, thread });
    }

    fn stop_renewal(&mut self) {
        if let Some(handle) = self.renewal.take() {
            let _ = handle.stop.send(());
            let _ = handle.thread.join();
        }
    }
}

impl<S: LeaseStore> Drop for LeaseLock<S> {
    fn drop(&mut self) {
        if self.state == LockState::Held
            && let Err(err) = self.release()
        {
            warn!(key = %self.lease_key, "lease release on drop failed: {err}");
        }
    }
}

/// Background renewal: extend the TTL every interval, abandon on failure.
///
/// Failure is conservative in the only safe direction: a store we cannot
/// reach, or a token that no longer matches, both mean exclusivity can no
/// longer be assumed, so the lease is dropped and the signal fired rather
/// than risking double-exclusive access.
fn renewal_loop<S: LeaseStore>(
    store: &Arc<S>,
    key: &str,
    token: &str,
    settings: LockSettings,
    held: &Arc<AtomicBool>,
    signal: &CancellationSignal,
    stop_rx: &mpsc::Receiver<()>,
) {
    loop {
        match stop_rx.recv_timeout(settings.renewal_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        match store.extend_lease(key, token, settings.lease_duration) {
            Ok(true) => {}
            Ok(false) => {
                held.store(false, Ordering::SeqCst);
                if signal.fire() {
                    warn!(key = %key, "lease no longer owned; abandoning lock");
                }
                return;
            }
            Err(err) => {
                held.store(false, Ordering::SeqCst);
                if signal.fire() {
                    warn!(key = %key, "lease renewal failed ({err}); abandoning lock");
                }
                return;
            }
        }
    }
}

/// Run `f` under the lease for `resource_key`, releasing afterwards.
///
/// The closure receives the lock's cancellation signal and must observe it
/// before committing side effects.
///
/// # Errors
///
/// Fails with [`ErrorCode::LockContention`] when the deadline passes
/// without acquisition, and propagates store and closure errors.
pub fn with_lease<S, T>(
    store: &Arc<S>,
    settings: LockSettings,
    deadline: Duration,
    resource_key: &str,
    f: impl FnOnce(&CancellationSignal) -> anyhow::Result<T>,
) -> anyhow::Result<T>
where
    S: LeaseStore,
{
    let mut lock = LeaseLock::new(Arc::clone(store), resource_key, settings);
    if !lock.acquire(deadline)? {
        anyhow::bail!(
            "{}: could not acquire lease for {resource_key} within {deadline:?}",
            ErrorCode::LockContention
        );
    }

    let result = f(lock.signal());

    if let Err(err) = lock.release() {
        warn!(resource = resource_key, "lease release failed: {err}");
    }
    result
}

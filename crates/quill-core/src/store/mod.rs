//! Lease store abstraction over a shared key-value backend.
//!
//! The lease lock needs exactly three atomic primitives from its backend:
//!
//! - set-if-absent with a TTL (the acquisition race)
//! - compare-and-act keyed on the fencing token (release and renewal)
//! - a lossy per-resource wake channel (a blocking pop that releasing
//!   holders push into, so waiters retry immediately instead of on timeout)
//!
//! The wake channel is a best-effort signaling optimization, never a
//! durable queue: a push with no active waiter is simply dropped, and a
//! missed push only costs one poll interval of latency.

pub mod memory;
pub mod redis;

use std::time::Duration;

use crate::error::ErrorCode;

pub use self::memory::MemoryLeaseStore;
pub use self::redis::RedisLeaseStore;

/// Key under which the fencing token of a held lease is stored.
#[must_use]
pub fn lease_key(resource: &str) -> String {
    format!("lock:{resource}")
}

/// Key of the per-resource wake channel.
#[must_use]
pub fn wake_key(resource: &str) -> String {
    format!("lock:wait:{resource}")
}

/// Errors surfaced by a lease store backend.
///
/// Every variant is treated as "the store cannot be trusted right now";
/// the lock reacts by conservatively abandoning its lease.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Machine-readable code associated with this store error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::StoreUnavailable,
        }
    }
}

/// Atomic lease operations against a shared key-value store.
///
/// Implementations must make each operation atomic with respect to every
/// other process sharing the backend; the compare-and-act operations must
/// never be two separate round trips.
pub trait LeaseStore: Send + Sync + 'static {
    /// Store `token` under `key` with `ttl`, only if `key` is absent.
    ///
    /// Returns `true` when the lease was taken. A key whose TTL already
    /// lapsed counts as absent.
    fn try_set_lease(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Reset the TTL of `key` to `ttl`, only if its value still equals `token`.
    ///
    /// Returns `false` when the stored value no longer matches (the lease
    /// lapsed, and possibly belongs to another holder now).
    fn extend_lease(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` and push a wake token to `wake_key`, only if the value
    /// under `key` still equals `token`.
    ///
    /// Returns `false` when the stored value no longer matches; the
    /// current holder's lease is left untouched in that case.
    fn release_lease(&self, key: &str, wake_key: &str, token: &str) -> Result<bool, StoreError>;

    /// Block until a wake token arrives on `wake_key` or `timeout` elapses.
    ///
    /// Spurious and stale wake-ups are allowed; callers always re-attempt
    /// the acquisition race afterwards.
    fn await_wake(&self, wake_key: &str, timeout: Duration) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::{lease_key, wake_key};

    #[test]
    fn key_naming_matches_wire_convention() {
        assert_eq!(lease_key("doc-1"), "lock:doc-1");
        assert_eq!(wake_key("doc-1"), "lock:wait:doc-1");
    }
}

//! Redis-backed lease store.
//!
//! Uses the store's native primitives for each contract operation:
//!
//! - `SET key token EX <ttl> NX` for the acquisition race
//! - server-side Lua scripts for compare-and-delete / compare-and-extend,
//!   so the token comparison and the action are a single atomic evaluation
//!   rather than two round trips
//! - `RPUSH`/`BLPOP` on the wake key as the lossy wake channel

use std::time::Duration;

use redis::{Client, Script};

use super::{LeaseStore, StoreError};

/// Delete the lease and wake one waiter, only if the token still matches.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  redis.call("del", KEYS[1])
  redis.call("rpush", KEYS[2], "1")
  return 1
else
  return 0
end
"#;

/// Reset the lease TTL, only if the token still matches.
const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("expire", KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// [`LeaseStore`] backed by a shared Redis instance.
pub struct RedisLeaseStore {
    client: Client,
}

impl RedisLeaseStore {
    /// Create a store from a Redis connection URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(from_redis)?;
        Ok(Self { client })
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        self.client.get_connection().map_err(from_redis)
    }
}

fn from_redis(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// EX takes whole seconds; never send 0, which Redis rejects.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl LeaseStore for RedisLeaseStore {
    fn try_set_lease(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .arg("NX")
            .query(&mut conn)
            .map_err(from_redis)?;
        Ok(reply.is_some())
    }

    fn extend_lease(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let extended: i64 = Script::new(EXTEND_SCRIPT)
            .key(key)
            .arg(token)
            .arg(ttl_secs(ttl))
            .invoke(&mut conn)
            .map_err(from_redis)?;
        Ok(extended == 1)
    }

    fn release_lease(&self, key: &str, wake_key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .key(wake_key)
            .arg(token)
            .invoke(&mut conn)
            .map_err(from_redis)?;
        Ok(released == 1)
    }

    fn await_wake(&self, wake_key: &str, timeout: Duration) -> Result<(), StoreError> {
        if timeout.is_zero() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        // Nil reply means the pop timed out, which is just "retry now".
        let _reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(wake_key)
            .arg(timeout.as_secs_f64())
            .query(&mut conn)
            .map_err(from_redis)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RedisLeaseStore;

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisLeaseStore::new("not a url").is_err());
    }

    #[test]
    fn accepts_standard_url() {
        assert!(RedisLeaseStore::new("redis://localhost:6379").is_ok());
    }
}

//! The `Cache` trait: a key/value store with TTL, used to throttle worker
//! spawns (`actions_spawn`) and stale-job recovery (`actions_retry`).

use async_trait::async_trait;
use std::time::Duration;

/// A key/value cache with per-entry TTL.
///
/// Implementations only need "set if absent, with expiry" semantics strong
/// enough to rate-limit spawns across concurrent requests; a single-process
/// in-memory map (`actionq-cache::InMemoryCache`) is the reference
/// implementation, but a shared backend (Redis, memcached) implements the
/// same trait in a multi-process deployment.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the current value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Sets `key` to `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Atomically sets `key` to `value` with the given `ttl` only if it is
    /// currently absent or expired; returns `true` if the set happened.
    ///
    /// This is what the spawn/retry throttles actually need: "has anyone
    /// else already done this in the last `ttl`?"
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool;
}

/// Cache key for the spawn throttle (§6), TTL = `batch_interval`.
pub const SPAWN_THROTTLE_KEY: &str = "actions_spawn";

/// Cache key for the stale-retry throttle (§6), TTL = `batch_timeout`.
pub const RETRY_THROTTLE_KEY: &str = "actions_retry";

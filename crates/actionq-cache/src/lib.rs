//! In-memory TTL cache implementing `actionq_core::Cache`.
//!
//! Backs the worker-spawn and stale-retry throttles (spec §6) in a
//! single-process deployment. A multi-process deployment would swap this
//! for a shared backend (Redis, memcached) behind the same trait; nothing
//! upstream of `Cache` cares which.

use std::time::{Duration, Instant};

use actionq_core::cache::Cache;
use async_trait::async_trait;
use dashmap::DashMap;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// A `DashMap`-backed cache, one entry per key, each carrying its own
/// expiry. Expired entries are reaped lazily on access, not on a
/// background timer.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn is_live(entry: &Entry, now: Instant) -> bool {
        entry.expires_at > now
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if Self::is_live(&entry, now) => Some(entry.value.clone()),
            Some(_) => {
                drop(self.entries.remove(key));
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        use dashmap::mapref::entry::Entry as MapEntry;

        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) if Self::is_live(occupied.get(), now) => false,
            MapEntry::Occupied(mut occupied) => {
                occupied.insert(Entry { value, expires_at: now + ttl });
                true
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry { value, expires_at: now + ttl });
                true
            }
        }
    }
}

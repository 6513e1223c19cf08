//! In-memory fakes for `Store` and `Cache`, for use in host application
//! tests that need a working action queue without a database.
//!
//! `FakeStore` is intentionally not a faithful model of transaction
//! isolation — two concurrent `claim_batch` calls on the same instance
//! will still not double-claim a row (it holds a single mutex for the
//! whole table), but it does not reproduce lock contention or partial
//! failure. For tests that exercise the real locking behavior, point at a
//! real `actionq-postgres::PgStore` instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use actionq_core::cache::Cache;
use actionq_core::error::StoreError;
use actionq_core::model::{FailureInfo, Job, JobStatus, NewJob};
use actionq_core::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

/// An in-memory `Store`, backed by a single `tokio::sync::Mutex<Vec<Job>>`.
pub struct FakeStore {
    rows: Mutex<Vec<Job>>,
    next_id: AtomicI64,
    dedupe_window_secs: i64,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            dedupe_window_secs: actionq_core::model::DEDUPE_WINDOW_SECONDS,
        }
    }

    /// Snapshot of every row currently held, in insertion order. For
    /// assertions in host tests.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn insert_batch(&self, jobs: Vec<NewJob>) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let mut inserted = 0usize;

        for job in jobs {
            let duplicate = rows.iter().any(|existing| {
                existing.signature == job.signature
                    && matches!(existing.status, JobStatus::Pending | JobStatus::Running)
                    && (now - existing.created_at).num_seconds() <= self.dedupe_window_secs
            });
            if duplicate {
                continue;
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            rows.push(Job {
                id,
                action: job.action,
                callback: job.callback,
                payload: job.payload,
                status: JobStatus::Pending,
                priority: job.priority,
                recurring: job.recurring,
                signature: job.signature,
                scheduled_at: job.scheduled_at,
                created_at: now,
                updated_at: None,
            });
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn claim_batch(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status == JobStatus::Pending && job.scheduled_at <= now)
            .map(|(idx, _)| idx)
            .collect();

        candidates.sort_by(|&a, &b| {
            rows[b]
                .priority
                .cmp(&rows[a].priority)
                .then(rows[a].scheduled_at.cmp(&rows[b].scheduled_at))
        });
        candidates.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            rows[idx].status = JobStatus::Running;
            rows[idx].updated_at = Some(now);
            claimed.push(rows[idx].clone());
        }

        Ok(claimed)
    }

    async fn complete_batch(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        for row in rows.iter_mut() {
            if ids.contains(&row.id) {
                row.status = JobStatus::Completed;
                row.updated_at = Some(now);
            }
        }
        Ok(())
    }

    async fn fail_batch(&self, failures: HashMap<i64, FailureInfo>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        for row in rows.iter_mut() {
            if failures.contains_key(&row.id) {
                row.status = JobStatus::Failed;
                row.updated_at = Some(now);
            }
        }
        Ok(())
    }

    async fn release_batch(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        for row in rows.iter_mut() {
            if ids.contains(&row.id) && row.status == JobStatus::Running {
                row.status = JobStatus::Pending;
                row.updated_at = Some(now);
            }
        }
        Ok(())
    }

    async fn retry_stale(&self, timeout_seconds: i64) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let mut recovered = 0u64;
        for row in rows.iter_mut() {
            if row.status == JobStatus::Running {
                let stale = row
                    .updated_at
                    .map(|u| (now - u).num_seconds() >= timeout_seconds)
                    .unwrap_or(false);
                if stale {
                    row.status = JobStatus::Pending;
                    row.updated_at = Some(now);
                    recovered += 1;
                }
            }
        }
        Ok(recovered)
    }
}

/// An in-memory `Cache` with no expiry sweeping — entries are checked
/// lazily, same as `actionq-cache::InMemoryCache`, but kept here
/// dependency-free so host tests don't need to pull in `dashmap`.
#[derive(Default)]
pub struct FakeCache {
    entries: Mutex<HashMap<String, (String, std::time::Instant)>>,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for FakeCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(key).filter(|(_, exp)| *exp > std::time::Instant::now()).map(|(v, _)| v.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value, std::time::Instant::now() + ttl));
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().await;
        let now = std::time::Instant::now();
        if let Some((_, exp)) = entries.get(key) {
            if *exp > now {
                return false;
            }
        }
        entries.insert(key.to_string(), (value, now + ttl));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionq_core::model::CallbackKey;

    fn job(signature: i64) -> NewJob {
        NewJob {
            action: "user.signup".to_string(),
            callback: CallbackKey::Named("send_welcome_email".to_string()),
            payload: serde_json::json!({}),
            priority: 10,
            recurring: None,
            signature,
            scheduled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn claim_then_complete_removes_from_claimable_set() {
        let store = FakeStore::new();
        store.insert_batch(vec![job(1)]).await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let again = store.claim_batch(10).await.unwrap();
        assert!(again.is_empty());

        store.complete_batch(&[claimed[0].id]).await.unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_signature_within_window_is_dropped() {
        let store = FakeStore::new();
        let inserted_first = store.insert_batch(vec![job(7)]).await.unwrap();
        let inserted_second = store.insert_batch(vec![job(7)]).await.unwrap();
        assert_eq!(inserted_first, 1);
        assert_eq!(inserted_second, 0);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_schedule() {
        let store = FakeStore::new();
        let mut low = job(1);
        low.priority = 1;
        let mut high = job(2);
        high.priority = 255;
        store.insert_batch(vec![low, high]).await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed[0].priority, 255);
        assert_eq!(claimed[1].priority, 1);
    }
}

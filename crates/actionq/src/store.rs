//! The `Store` trait: durable operations on the jobs table.
//!
//! This is the seam a production backend (`actionq-postgres`) and a test
//! fake (`actionq-testing::FakeStore`) both implement, so the dispatcher and
//! worker never depend on a concrete database.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{FailureInfo, Job, NewJob};

/// Durable operations on `actions` / `action_logs`.
///
/// All multi-statement operations are expected to run in one transaction;
/// on abort the backend rolls back, leaving jobs in their prior state.
/// Connection-level failures surface as [`StoreError`]; application-level
/// no-ops (e.g. an empty id list) return `Ok` without touching the backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Writes rows as `Pending`. Any row whose `signature` collides with an
    /// existing non-completed row created within the dedupe window
    /// (`model::DEDUPE_WINDOW_SECONDS`) is dropped silently. Returns the
    /// count actually inserted.
    async fn insert_batch(&self, jobs: Vec<NewJob>) -> Result<usize, StoreError>;

    /// Selects up to `limit` `Pending` rows whose `scheduled_at <= now`,
    /// ordered `priority DESC, scheduled_at ASC`, and transitions them to
    /// `Running` under row-level locking. An empty result commits cleanly.
    async fn claim_batch(&self, limit: u32) -> Result<Vec<Job>, StoreError>;

    /// Transitions the given ids to `Completed` and appends one log row
    /// each with the message `"Action completed successfully"`.
    async fn complete_batch(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Transitions the given ids to `Failed` and appends one log row each
    /// carrying the serialized [`FailureInfo`].
    async fn fail_batch(&self, failures: HashMap<i64, FailureInfo>) -> Result<(), StoreError>;

    /// Flips `Running` rows back to `Pending`. No log row is written.
    async fn release_batch(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Flips rows where `status = Running` and `updated_at` predates
    /// `now - timeout_seconds` back to `Pending`. Returns the affected
    /// count.
    async fn retry_stale(&self, timeout_seconds: i64) -> Result<u64, StoreError>;
}

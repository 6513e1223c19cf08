//! `Spawner`: how the dispatcher starts a worker once it has pending jobs,
//! without blocking the user-facing response (spec §4.4 step 4).

use async_trait::async_trait;

use crate::error::SpawnError;

#[async_trait]
pub trait Spawner: Send + Sync {
    /// Fire-and-forget: start a worker batch somewhere. Errors other than
    /// connect-timeouts should be logged by the caller at `warning`, never
    /// propagated (spec §7 `SpawnFailed`).
    async fn spawn(&self) -> Result<(), SpawnError>;
}

/// A spawner that does nothing; used when the host drives the worker
/// itself (e.g. an external cron calling the worker endpoint directly).
pub struct NoopSpawner;

#[async_trait]
impl Spawner for NoopSpawner {
    async fn spawn(&self) -> Result<(), SpawnError> {
        Ok(())
    }
}

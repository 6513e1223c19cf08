//! The worker: claims batches, executes jobs, records outcomes, reschedules
//! recurring jobs, and releases unprocessed work on a soft deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::cache::{Cache, RETRY_THROTTLE_KEY};
use crate::config::ActionQueueConfig;
use crate::error::{SpawnError, StoreError};
use crate::model::{CallbackKey, ClosureBox, FailureInfo, Job, NewJob};
use crate::registry::SharedRegistry;
use crate::scheduler::Scheduler;
use crate::signature::compute_signature;
use crate::spawn::Spawner;
use crate::store::Store;

/// Outcome of one `run_batch` invocation, useful for tests and for the HTTP
/// handler's response body.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub completed: u64,
    pub failed: u64,
    pub released: u64,
    pub rescheduled: u64,
}

pub struct Worker<D> {
    deps: Arc<D>,
    registry: SharedRegistry<D>,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    config: ActionQueueConfig,
}

impl<D: Send + Sync + 'static> Worker<D> {
    pub fn new(
        deps: Arc<D>,
        registry: SharedRegistry<D>,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        config: ActionQueueConfig,
    ) -> Self {
        Self {
            deps,
            registry,
            store,
            cache,
            config,
        }
    }

    /// Runs the main worker loop described in spec §4.5 until the batch
    /// queue is empty or the soft deadline is reached.
    pub async fn run_batch(&self) -> Result<BatchReport, StoreError> {
        let start = Instant::now();
        let soft_deadline = StdDuration::from_secs(self.config.soft_deadline_secs());

        self.maybe_retry_stale().await?;

        let mut report = BatchReport::default();

        loop {
            if start.elapsed() >= soft_deadline {
                break;
            }

            let jobs = self.store.claim_batch(self.config.batch_size).await?;
            if jobs.is_empty() {
                break;
            }

            for (idx, job) in jobs.iter().enumerate() {
                if start.elapsed() >= soft_deadline {
                    let remaining: Vec<i64> = jobs[idx..].iter().map(|j| j.id).collect();
                    if !remaining.is_empty() {
                        self.store.release_batch(&remaining).await?;
                        report.released += remaining.len() as u64;
                    }
                    return Ok(report);
                }

                self.execute_one(job, &mut report).await?;
            }
        }

        Ok(report)
    }

    async fn execute_one(&self, job: &Job, report: &mut BatchReport) -> Result<(), StoreError> {
        let outcome = self.invoke(job).await;

        match outcome {
            Ok(()) => {
                self.store.complete_batch(&[job.id]).await?;
                report.completed += 1;

                if let Some(recurring) = &job.recurring {
                    match Scheduler::next_run(job.scheduled_at, recurring, Utc::now()) {
                        Ok(next_scheduled_at) => {
                            let reschedule = NewJob {
                                action: job.action.clone(),
                                callback: job.callback.clone(),
                                payload: job.payload.clone(),
                                priority: job.priority,
                                recurring: Some(recurring.clone()),
                                signature: compute_signature(&job.action, &job.callback, &job.payload),
                                scheduled_at: next_scheduled_at,
                            };
                            self.store.insert_batch(vec![reschedule]).await?;
                            report.rescheduled += 1;
                        }
                        Err(err) => {
                            warn!(job_id = job.id, error = %err, "recurring job has no future run; marking failed");
                            let mut failures = HashMap::new();
                            failures.insert(job.id, FailureInfo::new(err.to_string(), String::new()));
                            self.store.fail_batch(failures).await?;
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(job_id = job.id, action = %job.action, error = %err, "job handler failed");
                let mut failures = HashMap::new();
                failures.insert(job.id, FailureInfo::new(err.to_string(), format!("{err:?}")));
                self.store.fail_batch(failures).await?;
                report.failed += 1;
            }
        }

        Ok(())
    }

    async fn invoke(&self, job: &Job) -> anyhow::Result<()> {
        let handler = {
            let registry = self.registry.read().expect("registry lock poisoned");
            registry.lookup(&job.action, &job.callback)
        };

        let Some(handler) = handler else {
            anyhow::bail!("no handler registered for action {:?} callback {:?}", job.action, job.callback);
        };

        // A closure job's row payload is a ClosureBox envelope; the
        // registered handler expects the captured arguments it contains,
        // not the envelope itself.
        let payload = if job.callback == CallbackKey::Closure {
            ClosureBox::unwrap_args(&job.payload)
                .map_err(|err| anyhow::anyhow!("closure job payload is not a valid ClosureBox: {err}"))?
        } else {
            job.payload.clone()
        };

        handler.call(payload, &self.deps).await
    }

    /// Throttled stale-job recovery (§4.5 step 2): only calls
    /// `retry_stale` if the `actions_retry` cache entry has expired.
    async fn maybe_retry_stale(&self) -> Result<u64, StoreError> {
        let ttl = StdDuration::from_secs(self.config.batch_timeout_secs.max(0) as u64);
        let allowed = self
            .cache
            .set_if_absent(RETRY_THROTTLE_KEY, Utc::now().timestamp().to_string(), ttl)
            .await;

        if !allowed {
            return Ok(0);
        }

        let recovered = self.store.retry_stale(self.config.batch_timeout_secs).await?;
        if recovered > 0 {
            info!(recovered, "recovered stale running jobs");
        }
        Ok(recovered)
    }
}

/// A [`Spawner`] that drives the worker directly on a spawned `tokio` task,
/// instead of issuing an HTTP request back at the host (§4.4 step 4,
/// "processes a batch inline").
pub struct InlineSpawner<D> {
    worker: Arc<Worker<D>>,
}

impl<D: Send + Sync + 'static> InlineSpawner<D> {
    pub fn new(worker: Arc<Worker<D>>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl<D: Send + Sync + 'static> Spawner for InlineSpawner<D> {
    async fn spawn(&self) -> Result<(), SpawnError> {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            if let Err(err) = worker.run_batch().await {
                warn!(error = %err, "inline worker batch failed");
            }
        });
        Ok(())
    }
}

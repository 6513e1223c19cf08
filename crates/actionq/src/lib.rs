//! # actionq-core
//!
//! A durable, database-backed action (job) queue embedded inside a
//! long-running web application.
//!
//! Application code registers named **actions** with one or more
//! handlers; triggering an action either runs its handlers synchronously
//! (instant) or persists them as jobs for a worker to execute later
//! (deferred). A worker claims pending jobs in bounded batches under
//! row-level locking, executes them, records outcomes, reschedules
//! recurring jobs, and recovers work abandoned by crashed workers.
//!
//! ## Architecture
//!
//! ```text
//! register()                     trigger()
//!     │                              │
//!     ▼                              ▼
//! CallbackRegistry <───────── Dispatcher ──► instant handlers run inline
//!     │  ▲                         │
//!     │  │ lookup                  ▼ buffer + flush
//!     │  │                      Store.insert_batch
//!     │  │                         │
//!     │  │                         ▼ on_request_end()
//!     │  │                      Spawner (HTTP self-call / inline task)
//!     │  │                         │
//!     │  └──────────────── Worker.run_batch()
//!     │                         │
//!     └─────────────────────────┴──► Store.claim_batch / complete / fail
//! ```
//!
//! ## Key invariants
//!
//! 1. A job in `Running` is owned by exactly one worker until it completes,
//!    fails, or is released/recovered back to `Pending`.
//! 2. No two `Pending` jobs share a `signature` within the dedupe window.
//! 3. Every state transition updates `updated_at` atomically with `status`.
//! 4. Recurring jobs reschedule strictly into the future (drift-free).
//! 5. `priority` is clamped to `[1,255]`, never rejected.
//!
//! ## What this is not
//!
//! Not a distributed scheduler across multiple databases, not an
//! exactly-once delivery system (at-least-once, idempotency is the
//! handler's job), not a cron-expression engine (only numeric intervals and
//! single human-readable offsets).

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod signature;
pub mod spawn;
pub mod store;
pub mod worker;

use std::sync::Arc;

pub use cache::Cache;
pub use config::{ActionQueueConfig, SpawnAuth, SpawnMode};
pub use dispatcher::Dispatcher;
pub use error::{ActionQueueError, SpawnError, StoreError};
pub use model::{CallbackKey, ClosureBox, FailureInfo, Job, JobLog, JobStatus, NewJob, RecurringSpec};
pub use registry::{shared_registry, ActionHandler, CallbackRegistry, FnHandler, SharedRegistry};
pub use scheduler::{RecurringInput, ScheduledAtInput, Scheduler};
pub use signature::compute_signature;
pub use spawn::{NoopSpawner, Spawner};
pub use store::Store;
pub use worker::{BatchReport, InlineSpawner, Worker};

/// Bundles a shared registry, dispatcher and worker behind one handle,
/// mirroring the bootstrap step of a host application: build once at
/// startup, hand the `Dispatcher` to request handlers and the `Worker` to
/// the worker HTTP endpoint (or an inline task).
pub struct ActionQueue<D> {
    dispatcher: Arc<Dispatcher<D>>,
    worker: Arc<Worker<D>>,
}

impl<D: Send + Sync + 'static> ActionQueue<D> {
    pub fn build(
        deps: D,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        spawner_factory: impl FnOnce(Arc<Worker<D>>) -> Arc<dyn Spawner>,
        config: ActionQueueConfig,
    ) -> Self {
        let deps = Arc::new(deps);
        let registry = shared_registry::<D>();

        let worker = Arc::new(Worker::new(
            deps.clone(),
            registry.clone(),
            store.clone(),
            cache.clone(),
            config.clone(),
        ));

        let spawner = spawner_factory(worker.clone());

        let dispatcher = Arc::new(Dispatcher::new(deps, registry, store, cache, spawner, config));

        Self { dispatcher, worker }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher<D>> {
        self.dispatcher.clone()
    }

    pub fn worker(&self) -> Arc<Worker<D>> {
        self.worker.clone()
    }
}

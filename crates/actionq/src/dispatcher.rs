//! The user-facing surface: `register`, `trigger`, `schedule_once`, buffer
//! flush and the shutdown/spawn protocol (spec §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::cache::{Cache, SPAWN_THROTTLE_KEY};
use crate::config::ActionQueueConfig;
use crate::error::{ActionQueueError, SpawnError};
use crate::model::{clamp_priority, CallbackKey, ClosureBox, NewJob, MAX_ACTION_NAME_BYTES, MAX_PAYLOAD_BYTES};
use crate::registry::{ActionHandler, SharedRegistry};
use crate::scheduler::{RecurringInput, ScheduledAtInput, Scheduler};
use crate::signature::compute_signature;
use crate::spawn::Spawner;
use crate::store::Store;

/// The stale-recovery horizon used by the dispatcher's opportunistic
/// shutdown check (§4.4 step 1). This is a fixed value independent of
/// `ActionQueueConfig::batch_timeout_secs`, which governs the worker's own
/// throttled recovery pass.
const SHUTDOWN_RETRY_STALE_SECONDS: i64 = 3600;

pub struct Dispatcher<D> {
    deps: Arc<D>,
    registry: SharedRegistry<D>,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    spawner: Arc<dyn Spawner>,
    config: ActionQueueConfig,
    buffer: tokio::sync::Mutex<Vec<NewJob>>,
    has_pending_jobs: AtomicBool,
}

impl<D: Send + Sync + 'static> Dispatcher<D> {
    pub fn new(
        deps: Arc<D>,
        registry: SharedRegistry<D>,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        spawner: Arc<dyn Spawner>,
        config: ActionQueueConfig,
    ) -> Self {
        Self {
            deps,
            registry,
            store,
            cache,
            spawner,
            config,
            buffer: tokio::sync::Mutex::new(Vec::new()),
            has_pending_jobs: AtomicBool::new(false),
        }
    }

    /// Proxies to the registry (spec §4.4).
    pub fn register(
        &self,
        action: &str,
        callback_key: CallbackKey,
        handler: Arc<dyn ActionHandler<D>>,
        priority: i16,
        instant: bool,
    ) -> Result<(), ActionQueueError> {
        self.registry
            .write()
            .expect("registry lock poisoned")
            .register(action, callback_key, handler, priority, instant)
    }

    /// Runs instant handlers synchronously in ascending-priority order,
    /// then buffers one job per deferred handler.
    pub async fn trigger(&self, action: &str, payload: serde_json::Value) -> Result<(), ActionQueueError> {
        let (instant_groups, deferred_groups) = {
            let registry = self.registry.read().expect("registry lock poisoned");
            (registry.instant_groups(action), registry.deferred_groups(action))
        };

        for (_priority, handlers) in instant_groups {
            for (_callback_key, handler) in handlers {
                handler
                    .call(payload.clone(), &self.deps)
                    .await
                    .map_err(|err| ActionQueueError::HandlerError {
                        message: err.to_string(),
                        trace: format!("{err:?}"),
                    })?;
            }
        }

        let now = Utc::now();
        let mut new_jobs = Vec::new();
        for (priority, handlers) in deferred_groups {
            for (callback_key, _handler) in handlers {
                let job = self.build_job(action, callback_key, payload.clone(), priority as i16, now, None)?;
                new_jobs.push(job);
            }
        }

        if !new_jobs.is_empty() {
            self.buffer.lock().await.extend(new_jobs);
            self.has_pending_jobs.store(true, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Buffers exactly one job, bypassing the registry entirely (spec
    /// §4.4).
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_once(
        &self,
        action: &str,
        callback_key: CallbackKey,
        payload: serde_json::Value,
        priority: i16,
        scheduled_at: ScheduledAtInput,
        recurring: Option<RecurringInput>,
    ) -> Result<(), ActionQueueError> {
        let now = Utc::now();
        let scheduled_at = Scheduler::resolve_scheduled_at(scheduled_at, now)?;
        let recurring = Scheduler::resolve_recurring(recurring)?;

        let job = self.build_job(action, callback_key, payload, priority, scheduled_at, recurring)?;
        self.buffer.lock().await.push(job);
        self.has_pending_jobs.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn build_job(
        &self,
        action: &str,
        callback_key: CallbackKey,
        payload: serde_json::Value,
        priority: i16,
        scheduled_at: chrono::DateTime<Utc>,
        recurring: Option<crate::model::RecurringSpec>,
    ) -> Result<NewJob, ActionQueueError> {
        if action.len() > MAX_ACTION_NAME_BYTES {
            return Err(ActionQueueError::ActionNameTooLong(action.to_string()));
        }

        // Closure jobs wrap their arguments in a ClosureBox before they're
        // persisted (spec §4.4): the registered closure handler is resolved
        // by the worker from the registry, not from the row.
        let payload = if callback_key == CallbackKey::Closure {
            ClosureBox::wrap(payload)
        } else {
            payload
        };

        let serialized_len = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(usize::MAX);
        if serialized_len > MAX_PAYLOAD_BYTES {
            return Err(ActionQueueError::PayloadTooLarge(serialized_len));
        }

        let signature = compute_signature(action, &callback_key, &payload);

        Ok(NewJob {
            action: action.to_string(),
            callback: callback_key,
            payload,
            priority: clamp_priority(priority),
            recurring,
            signature,
            scheduled_at,
        })
    }

    /// Writes buffered jobs via `Store::insert_batch` (which applies
    /// dedupe) and clears the buffer. Returns the count actually inserted.
    pub async fn flush(&self) -> Result<usize, ActionQueueError> {
        let jobs = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if jobs.is_empty() {
            return Ok(0);
        }
        let inserted = self.store.insert_batch(jobs).await?;
        Ok(inserted)
    }

    /// The shutdown/spawn protocol (spec §4.4): opportunistic stale
    /// recovery, flush, then a throttled worker spawn if there is pending
    /// work. Call this once per request from the host's request-end hook.
    pub async fn on_request_end(&self) -> Result<(), ActionQueueError> {
        if fastrand_f64() < self.config.retry_stale_probability {
            if let Err(err) = self.store.retry_stale(SHUTDOWN_RETRY_STALE_SECONDS).await {
                warn!(error = %err, "opportunistic retry_stale failed during shutdown");
            }
        }

        let buffer_empty = self.buffer.lock().await.is_empty();
        let has_pending = self.has_pending_jobs.load(Ordering::SeqCst);
        if buffer_empty && !has_pending {
            return Ok(());
        }

        self.flush().await?;

        if has_pending {
            self.maybe_spawn().await;
            self.has_pending_jobs.store(false, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Explicit flush, e.g. from a host handler that wants jobs visible
    /// immediately without waiting for `on_request_end`.
    pub async fn explicit_flush(&self) -> Result<usize, ActionQueueError> {
        self.flush().await
    }

    async fn maybe_spawn(&self) {
        let ttl = std::time::Duration::from_secs(self.config.batch_interval_secs);
        let allowed = self
            .cache
            .set_if_absent(SPAWN_THROTTLE_KEY, Utc::now().timestamp().to_string(), ttl)
            .await;

        if !allowed {
            return;
        }

        match self.spawner.spawn().await {
            Ok(()) => {}
            Err(SpawnError::ConnectTimeout) => {
                // Dropped silently per spec §5/§7.
            }
            Err(err) => {
                warn!(error = %err, "worker spawn failed");
            }
        }
    }
}

/// Thin indirection so tests can assert on retry-stale invocation without
/// depending on the `fastrand` crate being seeded a particular way.
fn fastrand_f64() -> f64 {
    fastrand::f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{shared_registry, FnHandler};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Deps;

    #[derive(Default)]
    struct RecordingStore {
        inserted: StdMutex<Vec<NewJob>>,
    }

    #[async_trait::async_trait]
    impl Store for RecordingStore {
        async fn insert_batch(&self, jobs: Vec<NewJob>) -> Result<usize, crate::error::StoreError> {
            let n = jobs.len();
            self.inserted.lock().unwrap().extend(jobs);
            Ok(n)
        }
        async fn claim_batch(&self, _limit: u32) -> Result<Vec<crate::model::Job>, crate::error::StoreError> {
            Ok(Vec::new())
        }
        async fn complete_batch(&self, _ids: &[i64]) -> Result<(), crate::error::StoreError> {
            Ok(())
        }
        async fn fail_batch(
            &self,
            _failures: StdHashMap<i64, crate::model::FailureInfo>,
        ) -> Result<(), crate::error::StoreError> {
            Ok(())
        }
        async fn release_batch(&self, _ids: &[i64]) -> Result<(), crate::error::StoreError> {
            Ok(())
        }
        async fn retry_stale(&self, _timeout_seconds: i64) -> Result<u64, crate::error::StoreError> {
            Ok(0)
        }
    }

    struct NullCache;

    #[async_trait::async_trait]
    impl Cache for NullCache {
        async fn get(&self, _key: &str) -> Option<String> {
            None
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
        async fn set_if_absent(&self, _key: &str, _value: String, _ttl: Duration) -> bool {
            true
        }
    }

    struct CountingSpawner {
        count: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Spawner for CountingSpawner {
        async fn spawn(&self) -> Result<(), SpawnError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_dispatcher() -> (Dispatcher<Deps>, Arc<RecordingStore>, Arc<CountingSpawner>) {
        let store = Arc::new(RecordingStore::default());
        let cache = Arc::new(NullCache);
        let spawner = Arc::new(CountingSpawner {
            count: std::sync::atomic::AtomicUsize::new(0),
        });
        let registry = shared_registry::<Deps>();
        let dispatcher = Dispatcher::new(
            Arc::new(Deps),
            registry,
            store.clone(),
            cache,
            spawner.clone(),
            ActionQueueConfig {
                retry_stale_probability: 0.0,
                ..Default::default()
            },
        );
        (dispatcher, store, spawner)
    }

    #[tokio::test]
    async fn instant_handlers_run_ascending_priority_with_no_rows_written() {
        let (dispatcher, store, _spawner) = test_dispatcher();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let order_a = order.clone();
        dispatcher
            .register(
                "user.signup",
                CallbackKey::Named("a".into()),
                Arc::new(FnHandler::new(move |_v, _d: &Deps| {
                    let order_a = order_a.clone();
                    async move {
                        order_a.lock().unwrap().push("a");
                        Ok(())
                    }
                })),
                10,
                true,
            )
            .unwrap();

        let order_b = order.clone();
        dispatcher
            .register(
                "user.signup",
                CallbackKey::Named("b".into()),
                Arc::new(FnHandler::new(move |_v, _d: &Deps| {
                    let order_b = order_b.clone();
                    async move {
                        order_b.lock().unwrap().push("b");
                        Ok(())
                    }
                })),
                5,
                true,
            )
            .unwrap();

        dispatcher.trigger("user.signup", serde_json::json!({"id": 42})).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deferred_handler_buffers_exactly_one_job_with_matching_signature() {
        let (dispatcher, store, _spawner) = test_dispatcher();

        dispatcher
            .register(
                "user.signup",
                CallbackKey::Named("send_welcome_email".into()),
                Arc::new(FnHandler::new(|_v, _d: &Deps| async { Ok(()) })),
                10,
                false,
            )
            .unwrap();

        dispatcher.trigger("user.signup", serde_json::json!({"x": 1})).await.unwrap();
        dispatcher.flush().await.unwrap();

        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        let job = &inserted[0];
        assert_eq!(job.callback, CallbackKey::Named("send_welcome_email".into()));
        let expected_sig = compute_signature("user.signup", &job.callback, &job.payload);
        assert_eq!(job.signature, expected_sig);
    }

    #[tokio::test]
    async fn on_request_end_spawns_at_most_once_per_throttle_window() {
        let (dispatcher, _store, spawner) = test_dispatcher();
        dispatcher
            .register(
                "user.signup",
                CallbackKey::Named("h".into()),
                Arc::new(FnHandler::new(|_v, _d: &Deps| async { Ok(()) })),
                10,
                false,
            )
            .unwrap();

        dispatcher.trigger("user.signup", serde_json::json!({})).await.unwrap();
        dispatcher.on_request_end().await.unwrap();
        assert_eq!(spawner.count.load(Ordering::SeqCst), 1);

        // `NullCache::set_if_absent` always returns `true`, so this second
        // call exercises `has_pending_jobs` rather than the cache throttle:
        // with no new deferred jobs since the last `on_request_end`, no
        // spawn should be requested.
        dispatcher.on_request_end().await.unwrap();
        assert_eq!(spawner.count.load(Ordering::SeqCst), 1);
    }
}

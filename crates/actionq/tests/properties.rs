//! Property-style tests for the invariants and scenarios in spec §8,
//! driven against `actionq-testing::FakeStore` rather than a live
//! database — see `actionq-postgres`'s `postgres-integration`-gated
//! tests for the row-locking-sensitive cases a fake store can't
//! reproduce.

use std::sync::Arc;
use std::time::Duration;

use actionq_core::model::{CallbackKey, NewJob};
use actionq_core::registry::{shared_registry, FnHandler};
use actionq_core::scheduler::Scheduler;
use actionq_core::store::Store;
use actionq_core::worker::Worker;
use actionq_core::{ActionQueueConfig, Dispatcher, NoopSpawner};
use actionq_testing::{FakeCache, FakeStore};

struct Deps;

fn job(signature: i64, priority: i16) -> NewJob {
    NewJob {
        action: "user.signup".to_string(),
        callback: CallbackKey::Named("send_welcome_email".to_string()),
        payload: serde_json::json!({}),
        priority,
        recurring: None,
        signature,
        scheduled_at: chrono::Utc::now(),
    }
}

/// Invariant 1 / scenario S3: a job claimed by one worker is invisible
/// to a second concurrent claim until it completes or fails.
#[tokio::test]
async fn mutual_exclusion_claimed_rows_are_not_double_claimed() {
    let store = Arc::new(FakeStore::new());
    store.insert_batch(vec![job(1, 10)]).await.unwrap();

    let first = store.claim_batch(10).await.unwrap();
    assert_eq!(first.len(), 1);

    let second = store.claim_batch(10).await.unwrap();
    assert!(second.is_empty(), "a running job must not be claimable again");

    store.complete_batch(&[first[0].id]).await.unwrap();
}

/// Invariant 2: no two pending jobs share a signature within the
/// dedupe window.
#[tokio::test]
async fn dedupe_window_drops_duplicate_signature() {
    let store = Arc::new(FakeStore::new());
    let inserted_first = store.insert_batch(vec![job(42, 10)]).await.unwrap();
    let inserted_second = store.insert_batch(vec![job(42, 10)]).await.unwrap();

    assert_eq!(inserted_first, 1);
    assert_eq!(inserted_second, 0, "duplicate signature within the window must be dropped");
}

/// Invariant: a distinct signature is never deduped against an unrelated row.
#[tokio::test]
async fn distinct_signatures_are_not_deduped() {
    let store = Arc::new(FakeStore::new());
    let inserted = store.insert_batch(vec![job(1, 10), job(2, 10)]).await.unwrap();
    assert_eq!(inserted, 2);
}

/// Property 4 / stale recovery: a running job older than the timeout is
/// recovered back to pending exactly once, and recovering a fresh job
/// is a no-op.
#[tokio::test]
async fn stale_recovery_is_idempotent_and_respects_timeout() {
    let store = Arc::new(FakeStore::new());
    store.insert_batch(vec![job(1, 10)]).await.unwrap();
    let claimed = store.claim_batch(10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    // Fresh running jobs are not recovered.
    let recovered_too_soon = store.retry_stale(3600).await.unwrap();
    assert_eq!(recovered_too_soon, 0);

    // A running job older than the timeout (immediate retry_stale with a
    // 0-second threshold) is recovered exactly once.
    let recovered = store.retry_stale(0).await.unwrap();
    assert_eq!(recovered, 1);

    let recovered_again = store.retry_stale(0).await.unwrap();
    assert_eq!(recovered_again, 0, "a job already back to pending is not re-recovered");
}

/// Invariant 5: priority is clamped into [1,255], never rejected.
#[tokio::test]
async fn out_of_range_priority_is_clamped_not_rejected() {
    let registry = shared_registry::<Deps>();
    let mut guard = registry.write().unwrap();
    guard
        .register(
            "user.signup",
            CallbackKey::Named("h".into()),
            Arc::new(FnHandler::new(|_v, _d: &Deps| async { Ok(()) })),
            -5,
            true,
        )
        .unwrap();
    drop(guard);

    let groups = registry.read().unwrap().instant_groups("user.signup");
    assert_eq!(groups[0].0, 1);
}

/// Scenario S5 / property: a numeric recurring job reschedules
/// drift-free — a missed interval jumps to the next aligned slot rather
/// than accumulating drift.
#[test]
fn recurring_reschedule_is_drift_free() {
    use chrono::{TimeZone, Utc};

    let base = Utc.timestamp_opt(0, 0).unwrap();
    let recurring = actionq_core::model::RecurringSpec::Interval(60);

    // Ran on time every interval for 5 runs: each next run is exactly
    // base + i*60, with no cumulative drift.
    let mut scheduled_at = base;
    for i in 1..=5i64 {
        let next = Scheduler::next_run(scheduled_at, &recurring, scheduled_at).unwrap();
        assert_eq!(next, base + chrono::Duration::seconds(i * 60));
        scheduled_at = next;
    }

    // A run that arrives late (now is two intervals past the scheduled
    // time) jumps to the next slot in the future rather than re-running
    // the missed ones.
    let late_now = base + chrono::Duration::seconds(150);
    let next = Scheduler::next_run(base, &recurring, late_now).unwrap();
    assert_eq!(next, base + chrono::Duration::seconds(180));
}

/// Scenario S1: instant handlers registered at different priorities run
/// in ascending order within one `trigger` call, and no jobs are
/// persisted for them.
#[tokio::test]
async fn instant_handlers_run_in_priority_order_with_nothing_persisted() {
    let store = Arc::new(FakeStore::new());
    let cache = Arc::new(FakeCache::new());
    let registry = shared_registry::<Deps>();
    let dispatcher = Dispatcher::new(
        Arc::new(Deps),
        registry,
        store.clone(),
        cache,
        Arc::new(NoopSpawner),
        ActionQueueConfig::default(),
    );

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let order_high = order.clone();
    dispatcher
        .register(
            "user.signup",
            CallbackKey::Named("late".into()),
            Arc::new(FnHandler::new(move |_v, _d: &Deps| {
                let order_high = order_high.clone();
                async move {
                    order_high.lock().unwrap().push(20);
                    Ok(())
                }
            })),
            20,
            true,
        )
        .unwrap();

    let order_low = order.clone();
    dispatcher
        .register(
            "user.signup",
            CallbackKey::Named("early".into()),
            Arc::new(FnHandler::new(move |_v, _d: &Deps| {
                let order_low = order_low.clone();
                async move {
                    order_low.lock().unwrap().push(1);
                    Ok(())
                }
            })),
            1,
            true,
        )
        .unwrap();

    dispatcher.trigger("user.signup", serde_json::json!({})).await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec![1, 20]);
    assert!(store.snapshot().await.is_empty());
}

/// spec §4.4/§9 closure dispatch: a handler registered under
/// `CallbackKey::Closure` is resolved by the worker exactly like a `Named`
/// handler, and the arguments it receives are unwrapped back out of the
/// `ClosureBox` envelope the dispatcher wrapped them in at schedule time.
#[tokio::test]
async fn closure_jobs_round_trip_through_the_closure_box_envelope() {
    let store = Arc::new(FakeStore::new());
    let cache = Arc::new(FakeCache::new());
    let registry = shared_registry::<Deps>();

    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_handler = seen.clone();
    registry
        .write()
        .unwrap()
        .register(
            "report.generate",
            CallbackKey::Closure,
            Arc::new(FnHandler::new(move |payload: serde_json::Value, _d: &Deps| {
                let seen_handler = seen_handler.clone();
                async move {
                    *seen_handler.lock().unwrap() = Some(payload);
                    Ok(())
                }
            })),
            10,
            false,
        )
        .unwrap();

    let dispatcher = Dispatcher::new(
        Arc::new(Deps),
        registry.clone(),
        store.clone(),
        cache.clone(),
        Arc::new(NoopSpawner),
        ActionQueueConfig::default(),
    );

    dispatcher
        .trigger("report.generate", serde_json::json!({"report_id": 7}))
        .await
        .unwrap();
    dispatcher.explicit_flush().await.unwrap();

    let worker = Worker::new(Arc::new(Deps), registry, store.clone(), cache, ActionQueueConfig::default());
    let report = worker.run_batch().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!({"report_id": 7})));
}

/// Scenario S6 / §4.5 soft deadline: a worker batch that exceeds its
/// soft deadline releases unprocessed jobs back to pending rather than
/// leaving them stuck in running.
#[tokio::test]
async fn soft_deadline_release_returns_unprocessed_jobs_to_pending() {
    let store = Arc::new(FakeStore::new());
    let cache = Arc::new(FakeCache::new());
    let registry = shared_registry::<Deps>();
    registry
        .write()
        .unwrap()
        .register(
            "user.signup",
            CallbackKey::Named("send_welcome_email".into()),
            Arc::new(FnHandler::new(|_v, _d: &Deps| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })),
            10,
            false,
        )
        .unwrap();

    // 30 jobs at 50ms each (1500ms total) against a 1s soft deadline
    // (the minimum nonzero value `soft_deadline_secs` can produce):
    // the worker must complete some, release the rest back to pending,
    // and leave none stuck in `running`.
    let jobs: Vec<NewJob> = (0..30).map(|i| job(i, 10)).collect();
    let total = jobs.len();
    store.insert_batch(jobs).await.unwrap();

    let worker = Worker::new(
        Arc::new(Deps),
        registry,
        store.clone(),
        cache,
        ActionQueueConfig {
            batch_size: 30,
            max_execution_time_secs: 6, // soft deadline = min(6,1800) - 5 = 1s
            ..Default::default()
        },
    );

    let report = worker.run_batch().await.unwrap();
    let snapshot = store.snapshot().await;

    assert!(
        snapshot.iter().all(|j| j.status != actionq_core::model::JobStatus::Running),
        "no job should be left running once run_batch returns"
    );
    assert_eq!(
        report.completed as usize + report.released as usize,
        total,
        "every claimed job is either completed or released, none silently dropped"
    );
    assert!(report.released > 0, "a 1.5s workload against a 1s deadline must release some jobs");
}

//! `CallbackRegistry`: action × priority → ordered handlers.
//!
//! Generic over a dependency type `D`, mirroring the teacher's
//! `Effect<Command, Deps>` shape: a handler is invoked with its
//! deserialized payload plus the container `D` it was registered against,
//! so "auto-wiring" is just borrowing fields off `D`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::ActionQueueError;
use crate::model::{clamp_priority, CallbackKey, MAX_ACTION_NAME_BYTES};

/// A handler registered against an action.
#[async_trait]
pub trait ActionHandler<D>: Send + Sync {
    async fn call(&self, payload: serde_json::Value, deps: &D) -> anyhow::Result<()>;
}

/// Adapts a plain async closure into an [`ActionHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut, D> ActionHandler<D> for FnHandler<F>
where
    F: Fn(serde_json::Value, &D) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
    D: Send + Sync,
{
    async fn call(&self, payload: serde_json::Value, deps: &D) -> anyhow::Result<()> {
        (self.f)(payload, deps).await
    }
}

#[derive(Clone)]
struct Registration<D> {
    callback_key: CallbackKey,
    handler: Arc<dyn ActionHandler<D>>,
}

/// One ordered list of handlers for a given `(action, priority)`.
type PriorityGroup<D> = Vec<Registration<D>>;

/// Maps `action -> priority -> ordered handlers`, with de-duplication on
/// `(action, priority, callback_key)`: a later `register` call for the same
/// triple replaces the earlier one in place, preserving position.
#[derive(Default)]
struct HandlerTable<D> {
    by_action: HashMap<String, HashMap<u8, PriorityGroup<D>>>,
}

impl<D> HandlerTable<D> {
    fn new() -> Self {
        Self {
            by_action: HashMap::new(),
        }
    }

    fn insert(&mut self, action: &str, priority: u8, callback_key: CallbackKey, handler: Arc<dyn ActionHandler<D>>) {
        let group = self
            .by_action
            .entry(action.to_string())
            .or_default()
            .entry(priority)
            .or_default();

        if let Some(existing) = group.iter_mut().find(|r| r.callback_key == callback_key) {
            existing.handler = handler;
        } else {
            group.push(Registration { callback_key, handler });
        }
    }

    /// Priority groups in ascending order, per spec §4.4/§9: lower priority
    /// numbers run first.
    fn ordered_groups(&self, action: &str) -> Vec<(u8, &PriorityGroup<D>)> {
        let Some(groups) = self.by_action.get(action) else {
            return Vec::new();
        };
        let mut out: Vec<_> = groups.iter().map(|(p, g)| (*p, g)).collect();
        out.sort_by_key(|(p, _)| *p);
        out
    }

    fn lookup(&self, action: &str, callback_key: &CallbackKey) -> Option<Arc<dyn ActionHandler<D>>> {
        self.by_action
            .get(action)?
            .values()
            .flat_map(|g| g.iter())
            .find(|r| &r.callback_key == callback_key)
            .map(|r| r.handler.clone())
    }
}

/// The in-process callback registry: two parallel tables, `instant` and
/// `deferred`.
pub struct CallbackRegistry<D> {
    instant: HandlerTable<D>,
    deferred: HandlerTable<D>,
}

impl<D> Default for CallbackRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> CallbackRegistry<D> {
    pub fn new() -> Self {
        Self {
            instant: HandlerTable::new(),
            deferred: HandlerTable::new(),
        }
    }

    /// Registers `handler` under `action` at `priority` (clamped to
    /// `[1,255]`). `instant` handlers run synchronously inside `trigger`;
    /// `deferred` handlers are persisted as jobs.
    pub fn register(
        &mut self,
        action: &str,
        callback_key: CallbackKey,
        handler: Arc<dyn ActionHandler<D>>,
        priority: i16,
        instant: bool,
    ) -> Result<(), ActionQueueError> {
        if action.len() > MAX_ACTION_NAME_BYTES {
            return Err(ActionQueueError::ActionNameTooLong(action.to_string()));
        }
        let priority = clamp_priority(priority) as u8;
        let table = if instant { &mut self.instant } else { &mut self.deferred };
        table.insert(action, priority, callback_key, handler);
        Ok(())
    }

    /// Ordered instant handlers for `action`, grouped by ascending priority.
    pub fn instant_groups(&self, action: &str) -> Vec<(u8, Vec<(CallbackKey, Arc<dyn ActionHandler<D>>)>)> {
        self.instant
            .ordered_groups(action)
            .into_iter()
            .map(|(p, g)| (p, g.iter().map(|r| (r.callback_key.clone(), r.handler.clone())).collect()))
            .collect()
    }

    /// Ordered deferred handlers for `action`, grouped by ascending
    /// priority — used by `trigger` to build jobs.
    pub fn deferred_groups(&self, action: &str) -> Vec<(u8, Vec<(CallbackKey, Arc<dyn ActionHandler<D>>)>)> {
        self.deferred
            .ordered_groups(action)
            .into_iter()
            .map(|(p, g)| (p, g.iter().map(|r| (r.callback_key.clone(), r.handler.clone())).collect()))
            .collect()
    }

    /// Resolves a deferred handler by `(action, callback_key)` — what the
    /// worker calls to find the code behind a claimed job. A handler
    /// registered under `CallbackKey::Closure` is resolved the same way as
    /// one registered under `Named`/`Method`; the worker unwraps its
    /// `ClosureBox`-wrapped payload separately before invoking it.
    pub fn lookup(&self, action: &str, callback_key: &CallbackKey) -> Option<Arc<dyn ActionHandler<D>>> {
        self.deferred.lookup(action, callback_key)
    }
}

/// A registry shared, read-mostly, between a `Dispatcher` and a `Worker`.
/// Registration happens during bootstrap; steady-state access is
/// read-only, matching spec §5's "no shared in-process mutable state
/// beyond the registries."
pub type SharedRegistry<D> = Arc<RwLock<CallbackRegistry<D>>>;

pub fn shared_registry<D>() -> SharedRegistry<D> {
    Arc::new(RwLock::new(CallbackRegistry::new()))
}

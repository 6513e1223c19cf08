//! Typed error surface for the action queue.
//!
//! Configuration/contract violations are thrown to callers; operational
//! errors (handler failures, spawn failures) are recorded on the job or
//! logged and otherwise suppressed so that one bad job never aborts a
//! batch.

use thiserror::Error;

/// Errors raised by the registry, scheduler and dispatcher.
#[derive(Debug, Error)]
pub enum ActionQueueError {
    #[error("action name exceeds 191 bytes: {0:?}")]
    ActionNameTooLong(String),

    #[error("serialized payload exceeds 65000 bytes ({0} bytes)")]
    PayloadTooLarge(usize),

    #[error("scheduled_at could not be parsed: {0:?}")]
    InvalidSchedule(String),

    #[error("recurring spec could not be parsed: {0:?}")]
    InvalidRecurring(String),

    #[error("recurring job {job_id} has no future run (recurring={recurring:?})")]
    RecurringInThePast { job_id: i64, recurring: String },

    #[error("handler failed: {message}")]
    HandlerError {
        message: String,
        trace: String,
    },

    #[error("job store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("worker spawn failed: {0}")]
    SpawnFailed(String),
}

/// Errors raised by a [`crate::store::Store`] implementation.
///
/// Connection-level failures propagate to the caller; application-level
/// validation errors (e.g. an empty id list) are treated as no-ops by
/// callers and never reach this type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not reach job store backend: {0}")]
    ConnectionFailed(String),

    #[error("job store backend error: {0}")]
    Backend(String),
}

/// Errors raised while firing a worker-spawn request.
///
/// Connect-timeouts are classified separately because spec §4.4/§6 requires
/// they be dropped silently rather than logged.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("spawn request timed out connecting to the worker endpoint")]
    ConnectTimeout,

    #[error("spawn request failed: {0}")]
    Other(String),
}

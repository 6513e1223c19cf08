//! Durable job row types.
//!
//! These mirror the `actions` / `action_logs` tables described by the
//! store's schema (see `actionq-postgres`'s migrations). `Job` is what
//! `Store::claim_batch` hands back; `NewJob` is what the dispatcher hands
//! to `Store::insert_batch` before the store has assigned an id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length, in bytes, of an action name (invariant 6).
pub const MAX_ACTION_NAME_BYTES: usize = 191;

/// Maximum length, in bytes, of a serialized payload (invariant 7).
pub const MAX_PAYLOAD_BYTES: usize = 65_000;

/// Default dedupe window, in seconds, used by `insert_batch` (§4.1).
pub const DEDUPE_WINDOW_SECONDS: i64 = 300;

/// Lowest and highest allowed priority (invariant 5); out-of-range values
/// are clamped on write, never rejected.
pub const MIN_PRIORITY: i16 = 1;
pub const MAX_PRIORITY: i16 = 255;

pub fn clamp_priority(priority: i16) -> i16 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A stable identifier for a registered handler.
///
/// This is the statically-typed re-architecture of "any callable value":
/// instead of resolving an opaque name through reflection, the queue
/// carries a tag + data variant that a `CallbackRegistry` can look up
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackKey {
    /// A free function, identified by a name stable across process restarts.
    Named(String),
    /// An instance-method handler, identified by `Class::method`.
    Method { class: String, method: String },
    /// A closure registered once at boot under the `"__CLOSURE__"` sentinel
    /// (exactly like a `Named` handler, since Rust can't serialize a
    /// closure's code across a row). The payload carries its captured
    /// arguments, wrapped in a [`ClosureBox`].
    Closure,
}

pub const CLOSURE_SENTINEL: &str = "__CLOSURE__";

impl CallbackKey {
    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        CallbackKey::Method {
            class: class.into(),
            method: method.into(),
        }
    }

    /// The wire representation used as the `callback` column value.
    pub fn as_wire_string(&self) -> String {
        match self {
            CallbackKey::Named(name) => name.clone(),
            CallbackKey::Method { class, method } => format!("{class}::{method}"),
            CallbackKey::Closure => CLOSURE_SENTINEL.to_string(),
        }
    }

    /// Reconstructs a `CallbackKey` from the `callback` column value.
    pub fn from_wire_string(s: &str) -> Self {
        if s == CLOSURE_SENTINEL {
            CallbackKey::Closure
        } else if let Some((class, method)) = s.split_once("::") {
            CallbackKey::Method {
                class: class.to_string(),
                method: method.to_string(),
            }
        } else {
            CallbackKey::Named(s.to_string())
        }
    }
}

/// Either a numeric interval in seconds, or a human-readable relative
/// offset (e.g. `"+1 hour"`, `"next monday"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecurringSpec {
    Interval(i64),
    Offset(String),
}

impl RecurringSpec {
    /// The column representation stored alongside the job.
    pub fn as_db_string(&self) -> String {
        match self {
            RecurringSpec::Interval(secs) => secs.to_string(),
            RecurringSpec::Offset(s) => s.clone(),
        }
    }
}

/// A durable job row, as returned by `Store::claim_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub action: String,
    pub callback: CallbackKey,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub priority: i16,
    pub recurring: Option<RecurringSpec>,
    pub signature: i64,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A not-yet-persisted job, produced by the dispatcher and handed to
/// `Store::insert_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub action: String,
    pub callback: CallbackKey,
    pub payload: serde_json::Value,
    pub priority: i16,
    pub recurring: Option<RecurringSpec>,
    pub signature: i64,
    pub scheduled_at: DateTime<Utc>,
}

/// The envelope a closure job's payload is wrapped in before it is handed
/// to `Store::insert_batch`. A Rust closure can't carry its code across a
/// database row the way a dynamically-typed callable can, so the code side
/// is resolved through the registry entry registered under
/// `CallbackKey::Closure` for the action (the "registered deserialiser");
/// only the captured arguments travel in `args`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureBox {
    pub args: serde_json::Value,
}

impl ClosureBox {
    /// Wraps `args` into the envelope stored as a job's payload.
    pub fn wrap(args: serde_json::Value) -> serde_json::Value {
        serde_json::to_value(ClosureBox { args }).expect("ClosureBox is always representable as JSON")
    }

    /// Recovers the original arguments from a stored payload.
    pub fn unwrap_args(payload: &serde_json::Value) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_value::<ClosureBox>(payload.clone()).map(|boxed| boxed.args)
    }
}

/// One row of `action_logs`: one state-change-of-interest per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub action_id: i64,
    pub status: JobStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The message recorded in `action_logs` for a failed job: message, stack
/// trace (or equivalent context) and a timestamp, serialized together so
/// `failBatch` has one opaque string to store (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    pub trace: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn to_log_message(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

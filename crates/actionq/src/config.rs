//! Configuration knobs enumerated in spec §6.
//!
//! Loaded explicitly by the host (e.g. from environment variables at
//! startup) and threaded through the dispatcher/worker — no ambient
//! globals or `lazy_static` singletons.

/// Which spawn-authentication scheme the worker endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnAuth {
    /// HMAC-SHA256 of `floor(now / 1000)`, compared constant-time.
    Hmac,
    /// A shared secret sent in the `X-Action-Secret` header, compared
    /// constant-time.
    SharedSecret,
}

/// How the dispatcher starts a worker once it has pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Fire a fire-and-forget HTTP request at the worker endpoint.
    Http,
    /// Run the worker inline on a spawned `tokio` task.
    Inline,
    /// Never spawn; the host is expected to drive the worker itself (e.g.
    /// from a separate cron-like process).
    Disabled,
}

#[derive(Debug, Clone)]
pub struct ActionQueueConfig {
    /// HMAC secret for the spawn key (§6 `ACTION_KEY`).
    pub action_key: String,
    /// Shared secret for the alternate auth scheme (§6 `ACTION_SECRET`).
    pub action_secret: String,
    /// Rows claimed per transaction (§6 `batchSize`, default 10).
    pub batch_size: u32,
    /// Minimum seconds between spawns; also the spawn-throttle cache TTL
    /// (§6 `batchInterval`, default 30).
    pub batch_interval_secs: u64,
    /// Stale-job recovery horizon in seconds (§6 `batchTimeout`, default
    /// 7200).
    pub batch_timeout_secs: i64,
    /// Host-imposed maximum execution time for one worker invocation, in
    /// seconds. The worker's soft deadline is
    /// `min(max_execution_time_secs, 1800) - 5`.
    pub max_execution_time_secs: u64,
    pub spawn_auth: SpawnAuth,
    pub spawn_mode: SpawnMode,
    /// Probability (0.0-1.0) of running `retry_stale` opportunistically on
    /// shutdown (§4.4 step 1, default 1/100).
    pub retry_stale_probability: f64,
}

impl Default for ActionQueueConfig {
    fn default() -> Self {
        Self {
            action_key: "default".to_string(),
            action_secret: "default".to_string(),
            batch_size: 10,
            batch_interval_secs: 30,
            batch_timeout_secs: 7200,
            max_execution_time_secs: 1800,
            spawn_auth: SpawnAuth::Hmac,
            spawn_mode: SpawnMode::Http,
            retry_stale_probability: 0.01,
        }
    }
}

impl ActionQueueConfig {
    /// `min(max_execution_time, 1800s) - 5s`, per spec §4.5.
    pub fn soft_deadline_secs(&self) -> u64 {
        self.max_execution_time_secs.min(1800).saturating_sub(5)
    }
}

//! The HTTP surface (spec §6): a worker entry point the dispatcher's
//! `HttpSpawner` calls fire-and-forget, and the `axum` router that serves
//! it.
//!
//! ```text
//! GET /actions/run?key=<hmac>      -- HMAC scheme, default
//! POST /queue/work                 -- shared-secret scheme (X-Action-Secret), optional
//! ```

use std::sync::Arc;
use std::time::Duration;

use actionq_core::config::{ActionQueueConfig, SpawnAuth};
use actionq_core::error::SpawnError;
use actionq_core::spawn::Spawner;
use actionq_core::worker::Worker;
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Computes the spawn key: HMAC-SHA256 of `floor(now_ms / 1000)` keyed by
/// `secret`, hex-encoded.
#[cfg(feature = "hmac-auth")]
pub fn compute_spawn_key(secret: &str, now: chrono::DateTime<Utc>) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let bucket = now.timestamp();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(bucket.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(feature = "hmac-auth")]
fn verify_spawn_key(secret: &str, candidate: &str) -> bool {
    let expected = compute_spawn_key(secret, Utc::now());
    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}

fn verify_shared_secret(secret: &str, candidate: &str) -> bool {
    secret.as_bytes().ct_eq(candidate.as_bytes()).into()
}

struct RouterState<D> {
    worker: Arc<Worker<D>>,
    config: ActionQueueConfig,
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    key: String,
}

async fn run_handler<D: Send + Sync + 'static>(
    State(state): State<Arc<RouterState<D>>>,
    Query(query): Query<RunQuery>,
) -> impl IntoResponse {
    #[cfg(feature = "hmac-auth")]
    let authorized = matches!(state.config.spawn_auth, SpawnAuth::Hmac)
        && verify_spawn_key(&state.config.action_key, &query.key);
    #[cfg(not(feature = "hmac-auth"))]
    let authorized = false;

    if !authorized {
        return (StatusCode::FORBIDDEN, "Invalid Key");
    }

    match state.worker.run_batch().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(err) => {
            warn!(error = %err, "worker batch failed during HTTP-triggered run");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error")
        }
    }
}

async fn queue_work_handler<D: Send + Sync + 'static>(
    State(state): State<Arc<RouterState<D>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let provided = headers
        .get("X-Action-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !matches!(state.config.spawn_auth, SpawnAuth::SharedSecret)
        || !verify_shared_secret(&state.config.action_secret, provided)
    {
        return (StatusCode::FORBIDDEN, "Invalid Key");
    }

    match state.worker.run_batch().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(err) => {
            warn!(error = %err, "worker batch failed during HTTP-triggered run");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error")
        }
    }
}

/// Builds the worker-facing router: `GET /actions/run` always, `POST
/// /queue/work` only when the `shared-secret-auth` feature is enabled.
pub fn worker_router<D: Send + Sync + 'static>(worker: Arc<Worker<D>>, config: ActionQueueConfig) -> Router {
    let state = Arc::new(RouterState { worker, config });

    let router = Router::new().route("/actions/run", get(run_handler::<D>));

    #[cfg(feature = "shared-secret-auth")]
    let router = router.route("/queue/work", post(queue_work_handler::<D>));
    #[cfg(not(feature = "shared-secret-auth"))]
    let router = {
        let _ = queue_work_handler::<D>;
        router
    };

    router.with_state(state)
}

/// Fires the fire-and-forget spawn request at the host's own worker
/// endpoint (spec §4.4 step 4 / §5): a 100ms connect timeout, with
/// connect-timeout and connection-reset errors both classified as
/// [`SpawnError::ConnectTimeout`] so the caller drops them silently
/// instead of logging.
pub struct HttpSpawner {
    client: reqwest::Client,
    worker_url: String,
    action_key: String,
}

impl HttpSpawner {
    /// `worker_url` is the full base URL of the host's own worker
    /// endpoint, e.g. `http://127.0.0.1:8080`.
    pub fn new(worker_url: impl Into<String>, action_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(100))
            .build()
            .expect("reqwest client builds with a fixed connect timeout");

        Self {
            client,
            worker_url: worker_url.into(),
            action_key: action_key.into(),
        }
    }
}

#[async_trait]
impl Spawner for HttpSpawner {
    async fn spawn(&self) -> Result<(), SpawnError> {
        #[cfg(feature = "hmac-auth")]
        let key = compute_spawn_key(&self.action_key, Utc::now());
        #[cfg(not(feature = "hmac-auth"))]
        let key = self.action_key.clone();

        let url = format!("{}/actions/run?key={}", self.worker_url, key);

        match self.client.get(&url).send().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() || err.is_connect() => Err(SpawnError::ConnectTimeout),
            Err(err) => Err(SpawnError::Other(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "hmac-auth")]
    #[test]
    fn spawn_key_is_stable_within_the_same_second_bucket() {
        let now = Utc::now();
        let a = compute_spawn_key("secret", now);
        let b = compute_spawn_key("secret", now);
        assert_eq!(a, b);
    }

    #[cfg(feature = "hmac-auth")]
    #[test]
    fn spawn_key_changes_with_a_different_secret() {
        let now = Utc::now();
        let a = compute_spawn_key("secret-a", now);
        let b = compute_spawn_key("secret-b", now);
        assert_ne!(a, b);
    }

    #[test]
    fn shared_secret_mismatch_is_rejected() {
        assert!(!verify_shared_secret("correct", "wrong"));
        assert!(verify_shared_secret("correct", "correct"));
    }
}

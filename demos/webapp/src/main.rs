//! A minimal host application wiring up the action queue end to end:
//! register a deferred handler, trigger it from a request handler, flush
//! and spawn the worker on request end, and serve the worker endpoint on
//! the same router.

use std::sync::Arc;

use actionq_core::{ActionQueue, ActionQueueConfig, CallbackKey, FnHandler};
use actionq_postgres::PgStore;
use axum::extract::State;
use axum::routing::post;
use axum::Router;
use sqlx::postgres::PgPoolOptions;

struct Deps {
    http_client: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/actionq_demo".to_string()))
        .await?;

    let deps = Deps {
        http_client: reqwest::Client::new(),
    };

    let store = Arc::new(PgStore::new(pool));
    let cache = Arc::new(actionq_cache::InMemoryCache::new());
    let config = ActionQueueConfig::default();

    let queue = ActionQueue::build(
        deps,
        store,
        cache,
        |_worker| Arc::new(actionq_http::HttpSpawner::new("http://127.0.0.1:8080", config_action_key())) as Arc<dyn actionq_core::Spawner>,
        config.clone(),
    );

    queue
        .dispatcher()
        .register(
            "user.signup",
            CallbackKey::method("WelcomeMailer", "send"),
            Arc::new(FnHandler::new(|payload: serde_json::Value, deps: &Deps| async move {
                let user_id = payload.get("user_id").and_then(|v| v.as_i64()).unwrap_or_default();
                tracing::info!(user_id, "sending welcome email");
                deps.http_client
                    .post("http://127.0.0.1:9090/mailer/welcome")
                    .json(&serde_json::json!({"user_id": user_id}))
                    .send()
                    .await?;
                Ok(())
            })),
            10,
            false,
        )
        .expect("action name within limits");

    let worker_router = actionq_http::worker_router(queue.worker(), config);

    let app = Router::new()
        .route("/signup", post(signup_handler))
        .merge(worker_router)
        .with_state(queue.dispatcher());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn signup_handler(
    State(dispatcher): State<Arc<actionq_core::Dispatcher<Deps>>>,
    body: axum::extract::Json<serde_json::Value>,
) -> &'static str {
    if let Err(err) = dispatcher.trigger("user.signup", body.0).await {
        tracing::warn!(error = %err, "trigger failed");
        return "error";
    }
    if let Err(err) = dispatcher.on_request_end().await {
        tracing::warn!(error = %err, "on_request_end failed");
    }
    "queued"
}

fn config_action_key() -> String {
    std::env::var("ACTION_KEY").unwrap_or_else(|_| "default".to_string())
}

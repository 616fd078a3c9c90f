mod accounts;
mod auth;
pub mod error;
mod events;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::db::Store;
use crate::snapshot::SnapshotStore;

pub use auth::CurrentUser;
pub use error::{ApiError, ApiResult};

/// Upper bound for `limit` on listing endpoints.
pub const MAX_PAGE_SIZE: usize = 500;

pub struct AppState {
    pub config: AppConfig,
    pub snapshots: SnapshotStore,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let snapshots = SnapshotStore::new(&config.snapshot_dir, &config.source, &config.entity);
        Self { config, snapshots }
    }
}

/// Runs `op` against a fresh store handle on the blocking pool. The
/// connection is closed when `op` returns, whatever the outcome.
pub(crate) async fn with_store<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(&Store) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let path = state.config.database_path.clone();
    tokio::task::spawn_blocking(move || {
        let store = Store::open(&path)?;
        op(&store)
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))?
    .map_err(ApiError::from)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Afisha API work" }))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(events::router())
        .merge(accounts::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

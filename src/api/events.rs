use std::{path::Path as FsPath, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{with_store, ApiError, ApiResult, AppState, MAX_PAGE_SIZE};
use crate::db::EventQuery;
use crate::models::{Event, ReconciliationResult};
use crate::reconcile;

#[derive(Debug, Deserialize)]
struct ListParams {
    rubric: Option<String>,
    skip: Option<usize>,
    limit: Option<usize>,
    archived: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconcileRequest {
    /// File name inside the snapshot directory; latest when omitted.
    snapshot: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReconcileResponse {
    snapshot: String,
    result: ReconciliationResult,
}

#[derive(Debug, Serialize)]
struct RubricsResponse {
    rubrics: Vec<String>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let query = EventQuery {
        rubric: params.rubric,
        skip: params.skip.unwrap_or(0),
        limit: params
            .limit
            .unwrap_or(EventQuery::default().limit)
            .min(MAX_PAGE_SIZE),
        include_archived: params
            .archived
            .unwrap_or(state.config.include_archived_by_default),
    };
    let events = with_store(&state, move |store| store.list_events(&query)).await?;
    Ok(Json(events))
}

async fn get_event(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Event>> {
    let event = with_store(&state, move |store| store.get_event(&id)).await?;
    Ok(Json(event))
}

async fn delete_event(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    with_store(&state, move |store| store.delete_event(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_rubrics(State(state): State<Arc<AppState>>) -> ApiResult<Json<RubricsResponse>> {
    let rubrics = with_store(&state, |store| store.list_rubrics()).await?;
    Ok(Json(RubricsResponse {
        rubrics: rubrics.into_iter().map(|rubric| rubric.code).collect(),
    }))
}

async fn trigger_reconcile(
    State(state): State<Arc<AppState>>,
    request: Option<Json<ReconcileRequest>>,
) -> ApiResult<Json<ReconcileResponse>> {
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let snapshots = state.snapshots.clone();

    let explicit = match request.snapshot.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            let file = FsPath::new(name);
            if file.file_name() != Some(file.as_os_str()) {
                return Err(ApiError::BadRequest(
                    "snapshot must be a file name inside the snapshot directory".into(),
                ));
            }
            Some(snapshots.dir().join(file))
        }
        _ => None,
    };

    let (path, result) = with_store(&state, move |store| match explicit {
        Some(path) => {
            let result = reconcile::reconcile_file(store, &snapshots, path.clone())?;
            Ok((path, result))
        }
        None => reconcile::reconcile_latest(store, &snapshots),
    })
    .await?;

    Ok(Json(ReconcileResponse {
        snapshot: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        result,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/{id}", get(get_event).delete(delete_event))
        .route("/rubrics", get(list_rubrics))
        .route("/reconcile", post(trigger_reconcile))
}

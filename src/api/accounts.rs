use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{with_store, ApiResult, AppState, CurrentUser};
use crate::models::{Favorite, Ticket, User};

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    token_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct EventRef {
    event_id: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = with_store(&state, move |store| {
        store.register_user(&body.username, &body.password)
    })
    .await?;
    tracing::info!("registered user {}", user.username);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> ApiResult<Json<LoginResponse>> {
    let token = with_store(&state, move |store| store.login(&body.username, &body.password)).await?;
    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer",
    }))
}

async fn list_favorites(
    CurrentUser(user): CurrentUser,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Favorite>>> {
    let favorites = with_store(&state, move |store| store.list_favorites(user.id)).await?;
    Ok(Json(favorites))
}

async fn add_favorite(
    CurrentUser(user): CurrentUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<EventRef>,
) -> ApiResult<(StatusCode, Json<Favorite>)> {
    let favorite =
        with_store(&state, move |store| store.add_favorite(user.id, &body.event_id)).await?;
    Ok((StatusCode::CREATED, Json(favorite)))
}

async fn remove_favorite(
    CurrentUser(user): CurrentUser,
    Path(event_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    with_store(&state, move |store| store.remove_favorite(user.id, &event_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tickets(
    CurrentUser(user): CurrentUser,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let tickets = with_store(&state, move |store| store.list_tickets(user.id)).await?;
    Ok(Json(tickets))
}

async fn buy_ticket(
    CurrentUser(user): CurrentUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<EventRef>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let ticket = with_store(&state, move |store| store.buy_ticket(user.id, &body.event_id)).await?;
    tracing::info!("user {} bought a ticket for {}", user.username, ticket.event.id);
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/favorites", get(list_favorites).post(add_favorite))
        .route("/favorites/{event_id}", delete(remove_favorite))
        .route("/tickets", get(list_tickets).post(buy_ticket))
}

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use ballotbox_core::PollUpdate;
use ballotbox_types::api::{Claims, CreatePollRequest, UpdatePollRequest, VoteRequest};

use crate::auth::AppState;
use crate::error::ApiError;

/// POST /poll — admin only.
pub async fn create_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let poll = state.engine.create(
        claims.sub,
        &req.title,
        &req.options,
        req.duration_minutes,
        None,
        req.is_private,
        req.allowed_users,
    )?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// GET /poll — filtered by the caller's visibility tier.
pub async fn list_polls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let polls = state.engine.list(Some(claims.sub), Some(&claims.email))?;
    Ok(Json(polls))
}

/// GET /poll/{id}
pub async fn get_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = state.engine.get(poll_id, Some(claims.sub), Some(&claims.email))?;
    Ok(Json(poll))
}

/// GET /poll/{id}/results — intentionally unauthenticated.
pub async fn get_results(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let results = state.engine.results(poll_id)?;
    Ok(Json(results))
}

/// PUT /poll/{id}/vote
pub async fn vote(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = state
        .engine
        .vote(claims.sub, poll_id, req.option_index, Some(&claims.email))?;
    Ok(Json(poll))
}

/// PUT /poll/{id} — admin only.
pub async fn update_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let poll = state.engine.update(
        poll_id,
        PollUpdate {
            title: req.title,
            options: req.options,
            duration_minutes: req.duration_minutes,
            is_private: req.is_private,
            allowed_users: req.allowed_users,
        },
    )?;
    Ok(Json(poll))
}

/// DELETE /poll/{id} — admin only.
pub async fn delete_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    state.engine.delete(poll_id)?;
    Ok(Json(json!({ "message": "Poll deleted" })))
}

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if !claims.role.is_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }
    Ok(())
}

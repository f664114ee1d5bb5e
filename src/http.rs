//! HTTP control surface: add, remove and inspect tracked matches.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::live::{EventSource, PlayerState};
use crate::registry::{MatchRegistry, MatchSnapshot, RegistryError};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!("Request failed ({}): {}", self.status, self.message);
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub fn router<S: EventSource>(registry: MatchRegistry<S>) -> Router {
    Router::new()
        .route("/matches", get(list_matches::<S>))
        .route(
            "/matches/{match_id}",
            post(add_match::<S>).delete(remove_match::<S>),
        )
        .route(
            "/matches/{match_id}/players/{steam_id}",
            get(get_player::<S>),
        )
        .with_state(registry)
}

async fn add_match<S: EventSource>(
    State(registry): State<MatchRegistry<S>>,
    Path(match_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    registry.add_match(&match_id)?;
    Ok(Json(serde_json::json!({
        "message": "Match added successfully",
        "match_id": match_id,
    })))
}

async fn remove_match<S: EventSource>(
    State(registry): State<MatchRegistry<S>>,
    Path(match_id): Path<String>,
) -> Json<serde_json::Value> {
    registry.remove_match(&match_id);
    Json(serde_json::json!({
        "message": "Match removed successfully",
        "match_id": match_id,
    }))
}

async fn list_matches<S: EventSource>(
    State(registry): State<MatchRegistry<S>>,
) -> Json<Vec<MatchSnapshot>> {
    Json(registry.snapshot())
}

async fn get_player<S: EventSource>(
    State(registry): State<MatchRegistry<S>>,
    Path((match_id, steam_id)): Path<(String, u64)>,
) -> Result<Json<PlayerState>, ApiError> {
    if !registry.contains(&match_id) {
        return Err(ApiError::not_found(format!("match {} is not tracked", match_id)));
    }
    registry
        .query(&match_id, steam_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no state for player {}", steam_id)))
}

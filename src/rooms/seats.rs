use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::Deserialize;

use crate::{db::Seat, occupancy::Coordinator, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct AcquireSeat {
    user_id: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(coordinator): State<Arc<Coordinator>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Vec<Seat>>> {
    Ok(Json(coordinator.list_seats(&room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn acquire(
    State(coordinator): State<Arc<Coordinator>>,
    Path((room_id, seat)): Path<(String, u32)>,
    Json(AcquireSeat { user_id }): Json<AcquireSeat>,
) -> AppResult<Json<Seat>> {
    Ok(Json(coordinator.acquire_seat(&room_id, seat, &user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn release(
    State(coordinator): State<Arc<Coordinator>>,
    Path((room_id, seat)): Path<(String, u32)>,
) -> AppResult<StatusCode> {
    coordinator.release_seat(&room_id, seat).await?;
    Ok(StatusCode::NO_CONTENT)
}

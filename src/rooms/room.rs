use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{db::Room, occupancy::Coordinator, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(coordinator): State<Arc<Coordinator>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(coordinator.room(&room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn invitation(
    State(coordinator): State<Arc<Coordinator>>,
    Path(code): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(coordinator.room_by_invitation(&code.to_ascii_uppercase()).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn close(
    State(coordinator): State<Arc<Coordinator>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(coordinator.close_room(&room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn destroy(
    State(coordinator): State<Arc<Coordinator>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(coordinator.destroy_room(&room_id).await?))
}

use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode, Json};

use crate::{db::Room, occupancy::{Coordinator, CreateRoom}, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn create_room(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<CreateRoom>,
) -> AppResult<(StatusCode, Json<Room>)> {
    let room = coordinator.create_room(request).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

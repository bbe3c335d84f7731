use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{db::UserHandle, occupancy::{Coordinator, OccupancyError}, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    State(coordinator): State<Arc<Coordinator>>,
    Path(user_id): Path<String>,
) -> AppResult<Json<UserHandle>> {
    let handle = coordinator.users()
        .resolve(&user_id)
        .await
        .map_err(OccupancyError::from)?;
    Ok(Json(handle))
}

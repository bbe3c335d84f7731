use std::sync::Arc;

use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{db::Member, occupancy::Coordinator, store::Page, AppResult, AppState};

const HISTORY_PAGE: u64 = 50;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    user_id: Option<String>,
    #[serde(default)]
    skip: u64,
    limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HistoryPage {
    total: u64,
    members: Vec<Member>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn join(
    State(coordinator): State<Arc<Coordinator>>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<Member>> {
    Ok(Json(coordinator.join(&room_id, &user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn leave(
    State(coordinator): State<Arc<Coordinator>>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    coordinator.leave(&room_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn heartbeat(
    State(coordinator): State<Arc<Coordinator>>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    coordinator.heartbeat(&room_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(coordinator): State<Arc<Coordinator>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Vec<Member>>> {
    Ok(Json(coordinator.list_members(&room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    State(coordinator): State<Arc<Coordinator>>,
    Path(room_id): Path<String>,
    Query(HistoryQuery { user_id, skip, limit }): Query<HistoryQuery>,
) -> AppResult<Json<HistoryPage>> {
    let page = Page::new(skip, Some(limit.unwrap_or(HISTORY_PAGE)));
    let (members, total) = coordinator.member_history(&room_id, user_id.as_deref(), page).await?;
    Ok(Json(HistoryPage { total, members }))
}

pub mod appresult;
pub mod config;
pub mod db;
pub mod occupancy;
pub mod profiles;
pub mod rooms;
pub mod store;
pub mod users;

use std::sync::Arc;

use axum::{extract::FromRef, Router};

pub use appresult::{AppError, AppResult};
use occupancy::Coordinator;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/rooms", rooms::router())
        .nest("/users", profiles::router())
        .with_state(state)
}

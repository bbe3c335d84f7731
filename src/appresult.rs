use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use tracing::error;

use crate::occupancy::OccupancyError;

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        use OccupancyError::*;
        match self.0.downcast_ref::<OccupancyError>() {
            Some(RoomNotJoinable { .. } | SeatTaken { .. }) => StatusCode::CONFLICT,
            Some(NotAMember { .. }) => StatusCode::FORBIDDEN,
            Some(SeatNotFound { .. } | RoomNotFound { .. } | UnknownInvitation { .. }) => StatusCode::NOT_FOUND,
            Some(InvalidSeatCount { .. }) => StatusCode::BAD_REQUEST,
            Some(StoreUnavailable(_) | Interrupted) => StatusCode::SERVICE_UNAVAILABLE,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("{:#}", self.0);
            return (
                status,
                format!("{}\n\n{}", self.0, self.0.backtrace()),
            )
                .into_response();
        }
        if status.is_server_error() {
            error!("{:#}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

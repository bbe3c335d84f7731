mod members;
mod new;
mod room;
mod seats;

use axum::{routing::{get, post, put}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(new::create_room))
        .route("/invitations/{code}", get(room::invitation))
        .route("/{room_id}", get(room::room).delete(room::destroy))
        .route("/{room_id}/close", post(room::close))
        .route("/{room_id}/history", get(members::history))
        .route("/{room_id}/members", get(members::list))
        .route("/{room_id}/members/{user_id}", put(members::join).delete(members::leave))
        .route("/{room_id}/members/{user_id}/heartbeat", post(members::heartbeat))
        .route("/{room_id}/seats", get(seats::list))
        .route("/{room_id}/seats/{seat}", put(seats::acquire).delete(seats::release))
}

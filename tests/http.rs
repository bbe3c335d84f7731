use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use roomseats::{
    occupancy::{Coordinator, OccupancyConfig},
    router,
    store::{SqliteStore, Store},
    users::UserDirectory,
    AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> Router {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let config = OccupancyConfig { default_seat_count: 4, ..OccupancyConfig::default() };
    let coordinator = Arc::new(Coordinator::new(store.clone(), UserDirectory::new(store, None), config));
    router(AppState { coordinator })
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn seat_flow_over_http() {
    let app = app().await;

    let (status, member) = call(&app, Method::PUT, "/rooms/r1/members/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(member["status"], "joined");
    call(&app, Method::PUT, "/rooms/r1/members/bob", None).await;

    let (status, seat) = call(&app, Method::PUT, "/rooms/r1/seats/2", Some(json!({ "user_id": "alice" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seat["occupant"], "alice");

    let (status, err) = call(&app, Method::PUT, "/rooms/r1/seats/2", Some(json!({ "user_id": "bob" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(err["error"].as_str().unwrap().contains("alice"));

    let (status, _) = call(&app, Method::PUT, "/rooms/r1/seats/7", Some(json!({ "user_id": "bob" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::PUT, "/rooms/r1/seats/0", Some(json!({ "user_id": "eve" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, Method::DELETE, "/rooms/r1/members/alice", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, seats) = call(&app, Method::GET, "/rooms/r1/seats", None).await;
    assert_eq!(seats.as_array().unwrap().len(), 4);
    assert!(seats[2]["occupant"].is_null());

    let (_, members) = call(&app, Method::GET, "/rooms/r1/members", None).await;
    assert_eq!(members.as_array().unwrap().len(), 1);
    assert_eq!(members[0]["user_id"], "bob");

    let (status, history) = call(&app, Method::GET, "/rooms/r1/history?user_id=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);
    assert_eq!(history["members"][0]["left_reason"], "left");
}

#[tokio::test]
async fn room_lifecycle_over_http() {
    let app = app().await;

    let (status, room) = call(
        &app,
        Method::POST,
        "/rooms",
        Some(json!({ "room_id": "live-7", "scenario": "karaoke", "seat_count": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(room["status"], "created");
    let code = room["invitation_code"].as_str().unwrap().to_owned();

    let (status, found) = call(&app, Method::GET, &format!("/rooms/invitations/{code}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["room_id"], "live-7");

    let (status, _) = call(&app, Method::POST, "/rooms/live-7/members/alice/heartbeat", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, closed) = call(&app, Method::POST, "/rooms/live-7/close", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "closed");
    let (status, _) = call(&app, Method::PUT, "/rooms/live-7/members/alice", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(&app, Method::GET, &format!("/rooms/invitations/{code}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, destroyed) = call(&app, Method::DELETE, "/rooms/live-7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(destroyed["status"], "destroyed");

    let (status, _) = call(&app, Method::GET, "/rooms/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_rooms_are_rejected() {
    let app = app().await;
    let (status, err) = call(&app, Method::POST, "/rooms", Some(json!({ "room_id": "big", "seat_count": 4294967295u32 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("4294967295"));

    let (status, _) = call(&app, Method::GET, "/rooms/big", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_handles_are_cached() {
    let app = app().await;
    let (status, first) = call(&app, Method::GET, "/users/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["user_id"], "alice");
    let (_, second) = call(&app, Method::GET, "/users/alice", None).await;
    assert_eq!(first["name"], second["name"]);
    assert_eq!(first["id"], second["id"]);
}

use std::{sync::Arc, time::Duration};

use roomseats::{
    db::{LeaveReason, MemberStatus, RoomStatus},
    occupancy::{Coordinator, OccupancyConfig, OccupancyError, Reaper, ReaperConfig},
    store::{Page, SqliteStore, Store},
    users::UserDirectory,
};
use time::OffsetDateTime;

fn coordinator_on(store: Arc<dyn Store>) -> Arc<Coordinator> {
    let config = OccupancyConfig { default_seat_count: 4, ..OccupancyConfig::default() };
    Arc::new(Coordinator::new(store.clone(), UserDirectory::new(store, None), config))
}

async fn fresh() -> (Arc<Coordinator>, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    (coordinator_on(store.clone()), store)
}

#[tokio::test]
async fn two_users_contend_for_a_seat() {
    let (coordinator, _) = fresh().await;
    coordinator.join("r1", "u1").await.unwrap();
    coordinator.join("r1", "u2").await.unwrap();

    coordinator.acquire_seat("r1", 2, "u1").await.unwrap();
    let err = coordinator.acquire_seat("r1", 2, "u2").await.unwrap_err();
    assert!(matches!(err, OccupancyError::SeatTaken { .. }));

    coordinator.leave("r1", "u1").await.unwrap();
    let seat = coordinator.acquire_seat("r1", 2, "u2").await.unwrap();
    assert_eq!(seat.occupant.as_deref(), Some("u2"));
}

#[tokio::test]
async fn silent_member_is_reaped_like_a_leave() {
    let (coordinator, _) = fresh().await;
    coordinator.join("r1", "u1").await.unwrap();
    coordinator.acquire_seat("r1", 0, "u1").await.unwrap();

    let reaper = Reaper::new(coordinator.clone(), ReaperConfig::default());
    let report = reaper.sweep(OffsetDateTime::now_utc() + time::Duration::seconds(45)).await;
    assert_eq!(report.evicted, 1);

    let snapshot = coordinator.snapshot("r1").await.unwrap();
    assert!(snapshot.members.is_empty());
    assert!(snapshot.seats.iter().all(|(_, holder)| holder.is_none()));

    let (history, total) = coordinator.member_history("r1", Some("u1"), Page::ALL).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(history[0].status, MemberStatus::Left);
    assert_eq!(history[0].left_reason, Some(LeaveReason::HeartbeatTimeout));
}

#[tokio::test]
async fn closed_room_turns_joins_away() {
    let (coordinator, _) = fresh().await;
    coordinator.join("r1", "u1").await.unwrap();
    coordinator.close_room("r1").await.unwrap();

    let err = coordinator.join("r1", "u2").await.unwrap_err();
    assert!(matches!(err, OccupancyError::RoomNotJoinable { status: RoomStatus::Closed, .. }));
    assert!(coordinator.list_members("r1").await.unwrap().is_empty());
}

#[tokio::test]
async fn restart_keeps_occupancy() {
    let (before, store) = fresh().await;
    before.join("r1", "u1").await.unwrap();
    before.join("r1", "u2").await.unwrap();
    before.acquire_seat("r1", 1, "u2").await.unwrap();

    let after = coordinator_on(store);
    assert_eq!(after.restore().await.unwrap(), 1);
    assert_eq!(after.snapshot("r1").await.unwrap(), before.snapshot("r1").await.unwrap());

    let err = after.acquire_seat("r1", 1, "u1").await.unwrap_err();
    assert!(matches!(err, OccupancyError::SeatTaken { ref holder, .. } if holder == "u2"));
}

#[tokio::test]
async fn reaper_task_runs_in_background() {
    let (coordinator, _) = fresh().await;
    coordinator.join("r1", "u1").await.unwrap();
    let config = ReaperConfig {
        interval: Duration::from_millis(20),
        heartbeat_timeout: Duration::ZERO,
        room_inactivity: Duration::from_secs(300),
    };
    let handle = Reaper::new(coordinator.clone(), config).spawn();

    let mut emptied = false;
    for _ in 0..50 {
        if coordinator.list_members("r1").await.unwrap().is_empty() {
            emptied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.abort();
    assert!(emptied);
}

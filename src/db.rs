use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Created,
    Closed,
    Destroyed,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Created => "created",
            RoomStatus::Closed => "closed",
            RoomStatus::Destroyed => "destroyed",
        }
    }
}

/// One lifecycle of a room. Reopening a room inserts a new document; older
/// ones stay behind for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(default)]
    pub id: String,
    pub room_id: String,
    pub scenario: String,
    pub invitation_code: String,
    pub seat_count: u32,
    pub status: RoomStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    // unique while created: room_id
    // unique while created: invitation_code
}

impl Room {
    pub fn new(
        room_id: impl Into<String>,
        scenario: impl Into<String>,
        invitation_code: impl Into<String>,
        seat_count: u32,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: String::new(),
            room_id: room_id.into(),
            scenario: scenario.into(),
            invitation_code: invitation_code.into(),
            seat_count,
            status: RoomStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Document for Room {
    const COLLECTION: &'static str = "rooms";
    const TOMBSTONE: &'static str = "destroyed";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Open,
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    #[serde(default)]
    pub id: String,
    pub room_id: String,
    pub index: u32,
    pub occupant: Option<String>,
    pub status: SeatStatus,

    // unique: room_id, index
}

impl Seat {
    pub fn open(room_id: impl Into<String>, index: u32) -> Self {
        Self {
            id: String::new(),
            room_id: room_id.into(),
            index,
            occupant: None,
            status: SeatStatus::Open,
        }
    }

    pub fn is_held(&self) -> bool {
        self.status == SeatStatus::Held || self.occupant.is_some()
    }
}

impl Document for Seat {
    const COLLECTION: &'static str = "seats";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Joined,
    Left,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Joined => "joined",
            MemberStatus::Left => "left",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Left,
    HeartbeatTimeout,
    RoomClosed,
    /// A newer joined record for the same user was found on reload.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub status: MemberStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_heartbeat: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub left_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub left_reason: Option<LeaveReason>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    // unique while joined: room_id, user_id
}

impl Member {
    pub fn joined(room_id: impl Into<String>, user_id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: String::new(),
            room_id: room_id.into(),
            user_id: user_id.into(),
            status: MemberStatus::Joined,
            last_heartbeat: now,
            left_at: None,
            left_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn leave(&mut self, reason: LeaveReason, now: OffsetDateTime) {
        self.status = MemberStatus::Left;
        self.left_at = Some(now);
        self.left_reason = Some(reason);
        self.updated_at = now;
    }
}

impl Document for Member {
    const COLLECTION: &'static str = "members";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Local copy of an account's display attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserHandle {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub avatar: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserHandle {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        avatar: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: String::new(),
            user_id: user_id.into(),
            name: name.into(),
            avatar,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Document for UserHandle {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

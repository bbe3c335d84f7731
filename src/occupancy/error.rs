use crate::db::RoomStatus;
use crate::store::StoreError;

pub type OccupancyResult<T> = Result<T, OccupancyError>;

#[derive(Debug, thiserror::Error)]
pub enum OccupancyError {
    #[error("room {room_id} is {} and cannot be joined", .status.as_str())]
    RoomNotJoinable { room_id: String, status: RoomStatus },
    #[error("user {user_id} is not a member of room {room_id}")]
    NotAMember { room_id: String, user_id: String },
    #[error("seat {seat} in room {room_id} is held by {holder}")]
    SeatTaken { room_id: String, seat: u32, holder: String },
    #[error("room {room_id} has no seat {seat}")]
    SeatNotFound { room_id: String, seat: u32 },
    #[error("room {room_id} does not exist")]
    RoomNotFound { room_id: String },
    #[error("no open room uses invitation code {code}")]
    UnknownInvitation { code: String },
    #[error("a room cannot have {requested} seats; the maximum is {max}")]
    InvalidSeatCount { requested: u32, max: u32 },
    #[error("operation interrupted by shutdown")]
    Interrupted,
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl OccupancyError {
    pub(crate) fn not_a_member(room_id: &str, user_id: &str) -> Self {
        Self::NotAMember { room_id: room_id.to_owned(), user_id: user_id.to_owned() }
    }

    pub(crate) fn seat_not_found(room_id: &str, seat: u32) -> Self {
        Self::SeatNotFound { room_id: room_id.to_owned(), seat }
    }

    pub(crate) fn room_not_found(room_id: &str) -> Self {
        Self::RoomNotFound { room_id: room_id.to_owned() }
    }
}

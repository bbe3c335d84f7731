use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{OccupancyError, OccupancyResult, SeatRegistry, members::{MembershipTracker, expired}};
use crate::db::{LeaveReason, Member, MemberStatus, Room, RoomStatus, Seat};
use crate::store::{Filter, Page, Sort, Store, StoreResult, documents};

/// A document changed in memory whose write has not reached the store yet.
#[derive(Debug, Clone)]
enum Pending {
    Room(Room),
    Seat(Seat),
    Member(Member),
}

impl Pending {
    fn id(&self) -> &str {
        match self {
            Pending::Room(room) => &room.id,
            Pending::Seat(seat) => &seat.id,
            Pending::Member(member) => &member.id,
        }
    }

    async fn write(&self, store: &dyn Store) -> StoreResult<()> {
        match self {
            Pending::Room(room) => documents::update(store, room).await.map(drop),
            Pending::Seat(seat) => documents::update(store, seat).await.map(drop),
            Pending::Member(member) => documents::update(store, member).await.map(drop),
        }
    }
}

/// Everything the authority knows about one room. Only ever touched while
/// the room's lock is held.
#[derive(Debug)]
pub(crate) struct RoomState {
    pub(crate) room: Room,
    pub(crate) seats: SeatRegistry,
    pub(crate) members: MembershipTracker,
    pending: HashMap<String, Pending>,
}

impl RoomState {
    /// Inserts a fresh room document and makes sure every seat it declares
    /// has a document, reusing `previous_seats` where they exist.
    pub(crate) async fn open(store: &dyn Store, room: Room, previous_seats: Vec<Seat>) -> StoreResult<Self> {
        let room = documents::insert(store, &room).await?;
        let seats = adopt_seats(store, &room, previous_seats).await?;
        Ok(Self {
            room,
            seats,
            members: MembershipTracker::default(),
            pending: HashMap::new(),
        })
    }

    /// Rebuilds a room from the store. The most recently created room
    /// document is the current lifecycle. Also repairs whatever a crash between a
    /// memory change and its write may have left behind. Repairs are queued
    /// as pending writes.
    pub(crate) async fn load(store: &dyn Store, room_id: &str) -> StoreResult<Option<Self>> {
        let of_room = Filter::new().eq("room_id", room_id);
        let (rooms, _) = documents::find_many::<Room>(store, &of_room, Sort::latest_created(), Page::ALL).await?;
        let mut rooms = rooms.into_iter();
        let Some(room) = rooms.next() else {
            return Ok(None);
        };

        let (seats, _) = documents::find_many::<Seat>(store, &of_room, Sort::oldest_first(), Page::ALL).await?;
        let seats = adopt_seats(store, &room, seats).await?;

        let mut state = Self {
            room,
            seats,
            members: MembershipTracker::default(),
            pending: HashMap::new(),
        };
        let now = OffsetDateTime::now_utc();

        for mut stale in rooms.filter(|older| older.status == RoomStatus::Created) {
            warn!(room_id, document = %stale.id, "closing superseded room document");
            stale.status = RoomStatus::Closed;
            stale.updated_at = now;
            state.mark(Pending::Room(stale));
        }

        let joined = of_room.clone().eq("status", MemberStatus::Joined.as_str());
        let (members, _) = documents::find_many::<Member>(store, &joined, Sort::newest_first(), Page::ALL).await?;
        for mut member in members {
            if state.room.status != RoomStatus::Created {
                warn!(room_id, user_id = %member.user_id, "member still joined to a closed room");
                member.leave(LeaveReason::RoomClosed, now);
                state.mark(Pending::Member(member));
            } else if state.members.active(&member.user_id).is_some() {
                warn!(room_id, user_id = %member.user_id, "duplicate joined record");
                member.leave(LeaveReason::Superseded, now);
                state.mark(Pending::Member(member));
            } else {
                state.members.insert(member);
            }
        }

        let orphaned: Vec<u32> = state
            .seats
            .iter()
            .filter(|seat| match &seat.occupant {
                Some(user_id) => state.members.active(user_id).is_none(),
                None => seat.is_held(),
            })
            .map(|seat| seat.index)
            .collect();
        for index in orphaned {
            warn!(room_id, seat = index, "seat held without a member");
            state.release_seat(index);
        }

        Ok(Some(state))
    }

    pub(crate) fn room_id(&self) -> &str {
        &self.room.room_id
    }

    pub(crate) fn is_joinable(&self) -> bool {
        self.room.status == RoomStatus::Created
    }

    /// Moves pending writes of a previous lifecycle of this room over.
    pub(crate) fn inherit_pending(&mut self, previous: RoomState) {
        for (id, write) in previous.pending {
            self.pending.entry(id).or_insert(write);
        }
    }

    fn mark(&mut self, write: Pending) {
        self.pending.insert(write.id().to_owned(), write);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.room.updated_at = now;
        self.mark(Pending::Room(self.room.clone()));
    }

    pub(crate) fn admit(&mut self, member: Member, now: OffsetDateTime) {
        self.members.insert(member);
        self.touch(now);
    }

    pub(crate) fn heartbeat(&mut self, user_id: &str, now: OffsetDateTime) -> OccupancyResult<()> {
        let Some(member) = self.members.touch_heartbeat(user_id, now) else {
            return Err(OccupancyError::not_a_member(&self.room.room_id, user_id));
        };
        let member = member.clone();
        self.mark(Pending::Member(member));
        Ok(())
    }

    pub(crate) fn acquire_seat(&mut self, index: u32, user_id: &str) -> OccupancyResult<Seat> {
        if self.members.active(user_id).is_none() {
            return Err(OccupancyError::not_a_member(self.room_id(), user_id));
        }
        let Some(seat) = self.seats.get(index) else {
            return Err(OccupancyError::seat_not_found(self.room_id(), index));
        };
        match &seat.occupant {
            Some(holder) if holder == user_id => return Ok(seat.clone()),
            Some(holder) => {
                return Err(OccupancyError::SeatTaken {
                    room_id: self.room.room_id.clone(),
                    seat: index,
                    holder: holder.clone(),
                });
            }
            None => {}
        }

        let Some(seat) = self.seats.set_occupant(index, user_id) else {
            return Err(OccupancyError::seat_not_found(&self.room.room_id, index));
        };
        let seat = seat.clone();
        self.mark(Pending::Seat(seat.clone()));
        Ok(seat)
    }

    /// The only place a seat is ever freed. Returns `None` for a seat the room
    /// doesn't have, otherwise whether the seat was held.
    pub(crate) fn release_seat(&mut self, index: u32) -> Option<bool> {
        if !self.seats.get(index)?.is_held() {
            return Some(false);
        }
        let seat = self.seats.clear_occupant(index)?.clone();
        debug!(room_id = %seat.room_id, seat = index, "seat released");
        self.mark(Pending::Seat(seat));
        Some(true)
    }

    /// The only place a membership ever ends, whether the user left, timed
    /// out or the room closed. Frees every seat the member held.
    pub(crate) fn end_membership(&mut self, user_id: &str, reason: LeaveReason, now: OffsetDateTime) -> Option<Member> {
        let member = self.members.mark_left(user_id, reason, now)?;
        for index in self.seats.held_by(user_id) {
            self.release_seat(index);
        }
        self.mark(Pending::Member(member.clone()));
        self.touch(now);
        Some(member)
    }

    pub(crate) fn evict_stale(&mut self, now: OffsetDateTime, timeout: Duration) -> Vec<String> {
        let stale = self.members.stale(now, timeout);
        for user_id in &stale {
            self.end_membership(user_id, LeaveReason::HeartbeatTimeout, now);
        }
        stale
    }

    pub(crate) fn is_inactive(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        self.is_joinable() && self.members.is_empty() && expired(self.room.updated_at, threshold, now)
    }

    pub(crate) fn close(&mut self, now: OffsetDateTime) {
        for user_id in self.members.user_ids() {
            self.end_membership(&user_id, LeaveReason::RoomClosed, now);
        }
        self.room.status = RoomStatus::Closed;
        self.touch(now);
    }

    /// Writes every pending document. Writes that fail stay queued; the
    /// first failure is returned after all writes were attempted.
    pub(crate) async fn flush(&mut self, store: &dyn Store) -> StoreResult<()> {
        let ids: Vec<String> = self.pending.keys().cloned().collect();
        let mut failure = None;
        for id in ids {
            let Some(write) = self.pending.get(&id) else {
                continue;
            };
            match write.write(store).await {
                Ok(()) => {
                    self.pending.remove(&id);
                }
                Err(err) => {
                    warn!(room_id = %self.room.room_id, document = %id, %err, "write deferred");
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Lines up seat documents with the room's seat count, inserting the ones
/// that are missing. The first document per index wins.
async fn adopt_seats(store: &dyn Store, room: &Room, existing: Vec<Seat>) -> StoreResult<SeatRegistry> {
    let mut by_index = BTreeMap::new();
    for seat in existing {
        if seat.index < room.seat_count {
            by_index.entry(seat.index).or_insert(seat);
        }
    }

    let mut seats = Vec::with_capacity(room.seat_count as usize);
    for index in 0..room.seat_count {
        let seat = match by_index.remove(&index) {
            Some(seat) => seat,
            None => documents::insert(store, &Seat::open(&room.room_id, index)).await?,
        };
        seats.push(seat);
    }
    Ok(SeatRegistry::new(seats))
}

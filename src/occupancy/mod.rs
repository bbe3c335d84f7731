//! Authority over who is in which room and who holds which seat.
//!
//! Every operation takes the room's lock, loads the room from the store on
//! first use, mutates memory and then writes the changed documents before
//! the lock is released. Rooms never wait on each other.

mod error;
mod members;
mod reaper;
mod room;
mod seats;

pub use error::{OccupancyError, OccupancyResult};
pub use members::MembershipTracker;
pub use reaper::{Reaper, ReaperConfig, SweepReport};
pub use seats::SeatRegistry;

use std::{collections::BTreeSet, sync::Arc};

use dashmap::DashMap;
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{LeaveReason, Member, Room, RoomStatus, Seat};
use crate::store::{Filter, OptionalExt, Page, Sort, Store, documents};
use crate::users::UserDirectory;

use room::RoomState;

/// Upper bound on seats per room.
pub const MAX_SEAT_COUNT: u32 = 64;

const INVITATION_LEN: usize = 6;
const INVITATION_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct OccupancyConfig {
    /// Seats given to rooms created without an explicit count.
    pub default_seat_count: u32,
    pub default_scenario: String,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            default_seat_count: 8,
            default_scenario: "voice".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRoom {
    pub room_id: Option<String>,
    pub scenario: Option<String>,
    pub seat_count: Option<u32>,
}

/// Who holds which seat and who is joined, independent of timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancySnapshot {
    pub status: RoomStatus,
    pub seats: Vec<(u32, Option<String>)>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSweep {
    pub evicted: Vec<String>,
    pub closed: bool,
}

#[derive(Default)]
struct RoomSlot {
    loaded: bool,
    state: Option<RoomState>,
}

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
    users: UserDirectory,
    config: OccupancyConfig,
    rooms: Arc<DashMap<String, Arc<Mutex<RoomSlot>>>>,
}

fn invitation_code() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(INVITATION_LEN)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect()
}

/// Runs `work` on its own task. Dropping the caller's future then cannot stop
/// it between a store write and the matching change in memory.
async fn detached<T, F>(work: F) -> OccupancyResult<T>
where
    T: Send + 'static,
    F: Future<Output = OccupancyResult<T>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(OccupancyError::Interrupted),
    }
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, users: UserDirectory, config: OccupancyConfig) -> Self {
        Self {
            store,
            users,
            config,
            rooms: Arc::new(DashMap::new()),
        }
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Locks a room, loading it from the store the first time it is seen.
    /// Slots are created lazily and never removed.
    async fn lock(&self, room_id: &str) -> OccupancyResult<OwnedMutexGuard<RoomSlot>> {
        let slot = Arc::clone(&self.rooms.entry(room_id.to_owned()).or_default());
        let mut slot = slot.lock_owned().await;
        if !slot.loaded {
            slot.state = RoomState::load(self.store.as_ref(), room_id).await?;
            slot.loaded = true;
            if let Some(state) = &slot.state {
                debug!(room_id, status = state.room.status.as_str(), "room loaded");
            }
        }
        Ok(slot)
    }

    /// Like `lock`, but gives `None` without creating a slot when the store
    /// has never seen the room.
    async fn lock_known(&self, room_id: &str) -> OccupancyResult<Option<OwnedMutexGuard<RoomSlot>>> {
        if !self.rooms.contains_key(room_id) {
            let of_room = Filter::new().eq("room_id", room_id);
            if documents::find_one::<Room>(self.store.as_ref(), &of_room).await.optional()?.is_none() {
                return Ok(None);
            }
        }
        self.lock(room_id).await.map(Some)
    }

    /// Rooms the authority currently tracks.
    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    fn seat_count(&self, requested: Option<u32>) -> OccupancyResult<u32> {
        let seat_count = requested.unwrap_or(self.config.default_seat_count);
        if seat_count > MAX_SEAT_COUNT {
            return Err(OccupancyError::InvalidSeatCount { requested: seat_count, max: MAX_SEAT_COUNT });
        }
        Ok(seat_count)
    }

    async fn fresh_invitation_code(&self) -> OccupancyResult<String> {
        let mut code = invitation_code();
        for _ in 0..INVITATION_ATTEMPTS {
            let in_use = Filter::new()
                .eq("invitation_code", code.as_str())
                .eq("status", RoomStatus::Created.as_str());
            if documents::find_one::<Room>(self.store.as_ref(), &in_use).await.optional()?.is_none() {
                return Ok(code);
            }
            code = invitation_code();
        }
        warn!(%code, "invitation code space looks crowded");
        Ok(code)
    }

    async fn open_room(&self, slot: &mut RoomSlot, room_id: &str, request: CreateRoom) -> OccupancyResult<Room> {
        let seat_count = self.seat_count(request.seat_count)?;
        let scenario = request.scenario.unwrap_or_else(|| self.config.default_scenario.clone());
        let code = self.fresh_invitation_code().await?;
        let room = Room::new(room_id, scenario, code, seat_count, OffsetDateTime::now_utc());

        let previous_seats = slot
            .state
            .as_ref()
            .map(|previous| previous.seats.clone().into_vec())
            .unwrap_or_default();
        let mut state = RoomState::open(self.store.as_ref(), room, previous_seats).await?;
        if let Some(previous) = slot.state.take() {
            state.inherit_pending(previous);
        }
        let room = state.room.clone();
        info!(room_id, scenario = %room.scenario, seat_count, code = %room.invitation_code, "room created");
        slot.state = Some(state);
        Ok(room)
    }

    /// Creates the room, or reopens it when its current lifecycle has ended.
    /// An already open room is returned as is.
    pub async fn create_room(&self, request: CreateRoom) -> OccupancyResult<Room> {
        self.seat_count(request.seat_count)?;
        let this = self.clone();
        detached(async move { this.create_room_inner(request).await }).await
    }

    async fn create_room_inner(&self, request: CreateRoom) -> OccupancyResult<Room> {
        let room_id = request.room_id.clone().unwrap_or_else(|| Uuid::now_v7().to_string());
        let mut slot = self.lock(&room_id).await?;
        if let Some(state) = &slot.state {
            if state.is_joinable() {
                return Ok(state.room.clone());
            }
        }
        let room = self.open_room(&mut slot, &room_id, request).await?;
        if let Some(state) = slot.state.as_mut() {
            state.flush(self.store.as_ref()).await?;
        }
        Ok(room)
    }

    pub async fn room(&self, room_id: &str) -> OccupancyResult<Room> {
        let Some(slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        slot.state
            .as_ref()
            .map(|state| state.room.clone())
            .ok_or_else(|| OccupancyError::room_not_found(room_id))
    }

    pub async fn room_by_invitation(&self, code: &str) -> OccupancyResult<Room> {
        let open = Filter::new()
            .eq("invitation_code", code)
            .eq("status", RoomStatus::Created.as_str());
        let Some(room) = documents::find_one::<Room>(self.store.as_ref(), &open).await.optional()? else {
            return Err(OccupancyError::UnknownInvitation { code: code.to_owned() });
        };
        let room = self.room(&room.room_id).await?;
        if room.invitation_code != code || !matches!(room.status, RoomStatus::Created) {
            return Err(OccupancyError::UnknownInvitation { code: code.to_owned() });
        }
        Ok(room)
    }

    pub async fn join(&self, room_id: &str, user_id: &str) -> OccupancyResult<Member> {
        let this = self.clone();
        let (room_id, user_id) = (room_id.to_owned(), user_id.to_owned());
        detached(async move { this.join_inner(&room_id, &user_id).await }).await
    }

    async fn join_inner(&self, room_id: &str, user_id: &str) -> OccupancyResult<Member> {
        self.users.resolve(user_id).await?;

        let store = self.store.as_ref();
        let mut slot = self.lock(room_id).await?;
        if slot.state.is_none() {
            self.open_room(&mut slot, room_id, CreateRoom::default()).await?;
        }
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        if !state.is_joinable() {
            return Err(OccupancyError::RoomNotJoinable {
                room_id: room_id.to_owned(),
                status: state.room.status,
            });
        }

        if let Some(member) = state.members.active(user_id) {
            let member = member.clone();
            state.flush(store).await?;
            return Ok(member);
        }

        let now = OffsetDateTime::now_utc();
        let member = documents::insert(store, &Member::joined(room_id, user_id, now)).await?;
        state.admit(member.clone(), now);
        info!(room_id, user_id, member_id = %member.id, "member joined");
        state.flush(store).await?;
        Ok(member)
    }

    pub async fn leave(&self, room_id: &str, user_id: &str) -> OccupancyResult<()> {
        let this = self.clone();
        let (room_id, user_id) = (room_id.to_owned(), user_id.to_owned());
        detached(async move { this.leave_inner(&room_id, &user_id).await }).await
    }

    async fn leave_inner(&self, room_id: &str, user_id: &str) -> OccupancyResult<()> {
        let store = self.store.as_ref();
        let Some(mut slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::not_a_member(room_id, user_id));
        };
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::not_a_member(room_id, user_id));
        };

        if state.end_membership(user_id, LeaveReason::Left, OffsetDateTime::now_utc()).is_some() {
            info!(room_id, user_id, "member left");
            state.flush(store).await?;
            return Ok(());
        }

        state.flush(store).await?;
        let any_record = Filter::new().eq("room_id", room_id).eq("user_id", user_id);
        match documents::find_one::<Member>(store, &any_record).await.optional()? {
            Some(_) => Ok(()),
            None => Err(OccupancyError::not_a_member(room_id, user_id)),
        }
    }

    pub async fn heartbeat(&self, room_id: &str, user_id: &str) -> OccupancyResult<()> {
        let this = self.clone();
        let (room_id, user_id) = (room_id.to_owned(), user_id.to_owned());
        detached(async move { this.heartbeat_inner(&room_id, &user_id).await }).await
    }

    async fn heartbeat_inner(&self, room_id: &str, user_id: &str) -> OccupancyResult<()> {
        let Some(mut slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::not_a_member(room_id, user_id));
        };
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::not_a_member(room_id, user_id));
        };
        state.heartbeat(user_id, OffsetDateTime::now_utc())?;
        state.flush(self.store.as_ref()).await?;
        Ok(())
    }

    pub async fn acquire_seat(&self, room_id: &str, seat: u32, user_id: &str) -> OccupancyResult<Seat> {
        let this = self.clone();
        let (room_id, user_id) = (room_id.to_owned(), user_id.to_owned());
        detached(async move { this.acquire_seat_inner(&room_id, seat, &user_id).await }).await
    }

    /// A seat whose write did not reach the store is given back before the
    /// error is returned. Other deferred writes do not fail the acquire.
    async fn acquire_seat_inner(&self, room_id: &str, seat: u32, user_id: &str) -> OccupancyResult<Seat> {
        let Some(mut slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::not_a_member(room_id, user_id));
        };
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::not_a_member(room_id, user_id));
        };
        let taken = state.acquire_seat(seat, user_id)?;
        if let Err(err) = state.flush(self.store.as_ref()).await {
            if state.is_pending(&taken.id) {
                state.release_seat(seat);
                warn!(room_id, user_id, seat, "seat acquire rolled back");
                return Err(err.into());
            }
            warn!(room_id, %err, "seat acquired; other writes deferred");
        }
        info!(room_id, user_id, seat, "seat acquired");
        Ok(taken)
    }

    pub async fn release_seat(&self, room_id: &str, seat: u32) -> OccupancyResult<()> {
        let this = self.clone();
        let room_id = room_id.to_owned();
        detached(async move { this.release_seat_inner(&room_id, seat).await }).await
    }

    async fn release_seat_inner(&self, room_id: &str, seat: u32) -> OccupancyResult<()> {
        let Some(mut slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::seat_not_found(room_id, seat));
        };
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::seat_not_found(room_id, seat));
        };
        match state.release_seat(seat) {
            None => return Err(OccupancyError::seat_not_found(room_id, seat)),
            Some(true) => info!(room_id, seat, "seat released on request"),
            Some(false) => {}
        }
        state.flush(self.store.as_ref()).await?;
        Ok(())
    }

    /// Joined members, most recently updated first.
    pub async fn list_members(&self, room_id: &str) -> OccupancyResult<Vec<Member>> {
        let Some(slot) = self.lock_known(room_id).await? else {
            return Ok(Vec::new());
        };
        Ok(slot.state.as_ref().map(|state| state.members.list()).unwrap_or_default())
    }

    /// Seats in index order.
    pub async fn list_seats(&self, room_id: &str) -> OccupancyResult<Vec<Seat>> {
        let Some(slot) = self.lock_known(room_id).await? else {
            return Ok(Vec::new());
        };
        Ok(slot
            .state
            .as_ref()
            .map(|state| state.seats.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every membership record of the room, any status, newest first.
    pub async fn member_history(
        &self,
        room_id: &str,
        user_id: Option<&str>,
        page: Page,
    ) -> OccupancyResult<(Vec<Member>, u64)> {
        let mut filter = Filter::new().eq("room_id", room_id);
        if let Some(user_id) = user_id {
            filter = filter.eq("user_id", user_id);
        }
        Ok(documents::find_many::<Member>(self.store.as_ref(), &filter, Sort::newest_first(), page).await?)
    }

    pub async fn snapshot(&self, room_id: &str) -> OccupancyResult<OccupancySnapshot> {
        let Some(slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        let Some(state) = slot.state.as_ref() else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        Ok(OccupancySnapshot {
            status: state.room.status,
            seats: state.seats.iter().map(|seat| (seat.index, seat.occupant.clone())).collect(),
            members: state.members.user_ids(),
        })
    }

    /// Evicts every member and closes the room.
    pub async fn close_room(&self, room_id: &str) -> OccupancyResult<Room> {
        let this = self.clone();
        let room_id = room_id.to_owned();
        detached(async move { this.close_room_inner(&room_id).await }).await
    }

    async fn close_room_inner(&self, room_id: &str) -> OccupancyResult<Room> {
        let Some(mut slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        if state.is_joinable() {
            let evicted = state.members.len();
            state.close(OffsetDateTime::now_utc());
            info!(room_id, evicted, "room closed");
        }
        state.flush(self.store.as_ref()).await?;
        Ok(state.room.clone())
    }

    /// Closes the room and soft-deletes its current document.
    pub async fn destroy_room(&self, room_id: &str) -> OccupancyResult<Room> {
        let this = self.clone();
        let room_id = room_id.to_owned();
        detached(async move { this.destroy_room_inner(&room_id).await }).await
    }

    async fn destroy_room_inner(&self, room_id: &str) -> OccupancyResult<Room> {
        let store = self.store.as_ref();
        let Some(mut slot) = self.lock_known(room_id).await? else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        let Some(state) = slot.state.as_mut() else {
            return Err(OccupancyError::room_not_found(room_id));
        };
        if state.room.status == RoomStatus::Destroyed {
            return Ok(state.room.clone());
        }
        let now = OffsetDateTime::now_utc();
        if state.is_joinable() {
            state.close(now);
        }
        // the soft delete must land after any queued update of the room
        state.flush(store).await?;
        documents::soft_delete::<Room>(store, &state.room.id).await?;
        state.room.status = RoomStatus::Destroyed;
        state.room.updated_at = now;
        info!(room_id, "room destroyed");
        Ok(state.room.clone())
    }

    /// Loads every open room from the store so the reaper sees them after a
    /// restart.
    pub async fn restore(&self) -> OccupancyResult<usize> {
        let open = Filter::new().eq("status", RoomStatus::Created.as_str());
        let (rooms, _) = documents::find_many::<Room>(self.store.as_ref(), &open, Sort::oldest_first(), Page::ALL).await?;
        let room_ids: BTreeSet<String> = rooms.into_iter().map(|room| room.room_id).collect();

        let mut restored = 0;
        for room_id in &room_ids {
            let mut slot = self.lock(room_id).await?;
            if let Some(state) = slot.state.as_mut() {
                if state.has_pending() {
                    if let Err(err) = state.flush(self.store.as_ref()).await {
                        warn!(%room_id, %err, "repairs deferred");
                    }
                }
                if state.is_joinable() {
                    restored += 1;
                }
            }
        }
        info!(restored, "occupancy restored from store");
        Ok(restored)
    }

    /// One reaper step for one room: evicts members with a stale heartbeat,
    /// closes the room once it has been empty for too long and retries any
    /// deferred writes.
    pub async fn sweep_room(
        &self,
        room_id: &str,
        now: OffsetDateTime,
        config: &ReaperConfig,
    ) -> OccupancyResult<RoomSweep> {
        let this = self.clone();
        let (room_id, config) = (room_id.to_owned(), *config);
        detached(async move { this.sweep_room_inner(&room_id, now, &config).await }).await
    }

    async fn sweep_room_inner(
        &self,
        room_id: &str,
        now: OffsetDateTime,
        config: &ReaperConfig,
    ) -> OccupancyResult<RoomSweep> {
        let mut slot = self.lock(room_id).await?;
        let Some(state) = slot.state.as_mut() else {
            return Ok(RoomSweep::default());
        };

        let evicted = state.evict_stale(now, config.heartbeat_timeout);
        for user_id in &evicted {
            info!(room_id, %user_id, "member evicted after heartbeat timeout");
        }
        let closed = state.is_inactive(now, config.room_inactivity);
        if closed {
            state.close(now);
            info!(room_id, "inactive room closed");
        }

        state.flush(self.store.as_ref()).await?;
        Ok(RoomSweep { evicted, closed })
    }
}

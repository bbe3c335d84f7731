use crate::db::{Seat, SeatStatus};

/// Seats of one room, indexed by seat number. Holds state only; the room
/// decides who may sit where.
#[derive(Debug, Clone, Default)]
pub struct SeatRegistry {
    seats: Vec<Seat>,
}

impl SeatRegistry {
    /// `seats` must be ordered by index, starting at zero with no gaps.
    pub fn new(seats: Vec<Seat>) -> Self {
        debug_assert!(seats.iter().enumerate().all(|(n, seat)| seat.index as usize == n));
        Self { seats }
    }

    pub fn get(&self, index: u32) -> Option<&Seat> {
        self.seats.get(index as usize)
    }

    pub fn set_occupant(&mut self, index: u32, user_id: &str) -> Option<&Seat> {
        let seat = self.seats.get_mut(index as usize)?;
        seat.occupant = Some(user_id.to_owned());
        seat.status = SeatStatus::Held;
        Some(seat)
    }

    pub fn clear_occupant(&mut self, index: u32) -> Option<&Seat> {
        let seat = self.seats.get_mut(index as usize)?;
        seat.occupant = None;
        seat.status = SeatStatus::Open;
        Some(seat)
    }

    pub fn held_by(&self, user_id: &str) -> Vec<u32> {
        self.seats
            .iter()
            .filter(|seat| seat.occupant.as_deref() == Some(user_id))
            .map(|seat| seat.index)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn into_vec(self) -> Vec<Seat> {
        self.seats
    }
}

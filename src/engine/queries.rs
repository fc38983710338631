use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{available_slots, slot_grid};
use super::conflict::now_ms;
use super::{Engine, EngineError};

impl Engine {
    // ── Catalog reads ────────────────────────────────────────
    //
    // Listings and lookups only see active entries; a soft-deleted entity
    // is indistinguishable from one that never existed.

    pub fn list_offices(&self) -> Vec<OfficeInfo> {
        let mut offices: Vec<OfficeInfo> = self
            .offices
            .iter()
            .filter(|e| e.value().is_active)
            .map(|e| {
                let o = e.value();
                OfficeInfo {
                    id: o.id,
                    name: o.name.clone(),
                    location: o.location.clone(),
                    is_active: o.is_active,
                }
            })
            .collect();
        offices.sort_by_key(|o| o.id);
        offices
    }

    pub fn get_office(&self, id: Ulid) -> Result<OfficeInfo, EngineError> {
        self.offices
            .get(&id)
            .filter(|o| o.is_active)
            .map(|o| OfficeInfo {
                id: o.id,
                name: o.name.clone(),
                location: o.location.clone(),
                is_active: o.is_active,
            })
            .ok_or(EngineError::NotFound(id))
    }

    pub fn list_rooms(&self, office_id: Option<Ulid>) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .filter(|e| e.value().is_active)
            .filter(|e| office_id.is_none_or(|oid| e.value().office_id == oid))
            .map(|e| {
                let r = e.value();
                RoomInfo {
                    id: r.id,
                    office_id: r.office_id,
                    name: r.name.clone(),
                    is_active: r.is_active,
                }
            })
            .collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn get_room(&self, id: Ulid) -> Result<RoomInfo, EngineError> {
        self.rooms
            .get(&id)
            .filter(|r| r.is_active)
            .map(|r| RoomInfo {
                id: r.id,
                office_id: r.office_id,
                name: r.name.clone(),
                is_active: r.is_active,
            })
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_seats(&self, room_id: Option<Ulid>) -> Vec<SeatInfo> {
        let arcs: Vec<_> = self.seats.iter().map(|e| e.value().clone()).collect();
        let mut seats = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            if guard.is_active && room_id.is_none_or(|rid| guard.room_id == rid) {
                seats.push(SeatInfo {
                    id: guard.id,
                    room_id: guard.room_id,
                    number: guard.number,
                    is_active: guard.is_active,
                });
            }
        }
        seats.sort_by_key(|s| (s.number, s.id));
        seats
    }

    pub async fn get_seat(&self, id: Ulid) -> Result<SeatInfo, EngineError> {
        let arc = self.seat_arc(&id)?;
        let guard = arc.read().await;
        if !guard.is_active {
            return Err(EngineError::NotFound(id));
        }
        Ok(SeatInfo {
            id: guard.id,
            room_id: guard.room_id,
            number: guard.number,
            is_active: guard.is_active,
        })
    }

    // ── Booking reads ────────────────────────────────────────

    /// The caller's active bookings, ordered by start time.
    pub async fn list_bookings_for_user(&self, user: &str) -> Result<Vec<BookingInfo>, EngineError> {
        self.sweep_expired().await?;
        let arcs: Vec<_> = self.seats.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            for b in &guard.bookings {
                if b.is_active && b.user == user {
                    bookings.push(booking_info(guard.id, b));
                }
            }
        }
        bookings.sort_by_key(|b| (b.start, b.id));
        Ok(bookings)
    }

    /// All of the caller's bookings on a seat — active or not — whose span
    /// intersects the server-timezone day window of `date`.
    pub async fn booking_history(
        &self,
        user: &str,
        seat_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        self.sweep_expired().await?;
        let day = self.settings.day_window(date).ok_or(EngineError::Validation(
            "date is not representable in the configured timezone",
        ))?;
        // History remains queryable on a deactivated seat.
        let arc = self.seat_arc(&seat_id)?;
        let guard = arc.read().await;
        let mut bookings: Vec<BookingInfo> = guard
            .overlapping(&day)
            .filter(|b| b.user == user)
            .map(|b| booking_info(guard.id, b))
            .collect();
        bookings.sort_by_key(|b| (b.start, b.id));
        Ok(bookings)
    }

    // ── Availability ─────────────────────────────────────────

    /// Free slots for one seat on `date`, in chronological order.
    pub async fn available_slots_for_seat(
        &self,
        seat_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        self.sweep_expired().await?;
        let grid = slot_grid(&self.settings, date, now_ms())?;
        let arc = self.seat_arc(&seat_id)?;
        let guard = arc.read().await;
        if !guard.is_active {
            return Err(EngineError::NotFound(seat_id));
        }
        Ok(available_slots(&guard, &grid))
    }

    /// Free slots for every active seat in a room, seat-major (by seat
    /// number, id as tie-break), time-minor. A missing or inactive room is
    /// NotFound; a room with zero active seats yields an empty vec.
    pub async fn available_seats_for_room(
        &self,
        room_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SeatSlots>, EngineError> {
        self.sweep_expired().await?;
        if !self.rooms.get(&room_id).is_some_and(|r| r.is_active) {
            return Err(EngineError::NotFound(room_id));
        }
        let grid = slot_grid(&self.settings, date, now_ms())?;

        let seat_ids = self
            .seats_by_room
            .get(&room_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut rows = Vec::new();
        for seat_id in seat_ids {
            if let Some(arc) = self.seat_arc_opt(&seat_id) {
                let guard = arc.read().await;
                if guard.is_active {
                    rows.push((guard.number, seat_id, available_slots(&guard, &grid)));
                }
            }
        }
        rows.sort_by_key(|(number, id, _)| (*number, *id));
        Ok(rows
            .into_iter()
            .map(|(_, seat_id, slots)| SeatSlots { seat_id, slots })
            .collect())
    }
}

fn booking_info(seat_id: Ulid, b: &Booking) -> BookingInfo {
    BookingInfo {
        id: b.id,
        seat_id,
        user: b.user.clone(),
        start: b.span.start,
        end: b.span.end,
        created_at: b.created_at,
        is_active: b.is_active,
    }
}

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type inside the engine.
pub type Ms = i64;

pub const MS_PER_SECOND: Ms = 1_000;
pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_HOUR: Ms = 3_600_000;

/// A half-open `[start, end)` window of time. Two spans overlap exactly
/// when each starts before the other ends; a span ending where another
/// begins does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "span must start before it ends");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Catalog entities ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Office {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: Ulid,
    pub office_id: Ulid,
    pub name: String,
    pub is_active: bool,
}

/// A single booking on a seat. Cancelled and expired bookings stay in the
/// seat's list with `is_active = false`; they are the booking history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub user: String,
    pub span: Span,
    pub created_at: Ms,
    pub is_active: bool,
}

/// Per-seat state. The engine wraps each seat in `Arc<RwLock<SeatState>>`,
/// which is the mutual-exclusion domain for booking writes on that seat.
#[derive(Debug, Clone)]
pub struct SeatState {
    pub id: Ulid,
    pub room_id: Ulid,
    pub number: u32,
    pub is_active: bool,
    /// All bookings ever made on this seat, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl SeatState {
    pub fn new(id: Ulid, room_id: Ulid, number: u32) -> Self {
        Self {
            id,
            room_id,
            number,
            is_active: true,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OfficeCreated {
        id: Ulid,
        name: String,
        location: String,
    },
    OfficeUpdated {
        id: Ulid,
        name: String,
        location: String,
    },
    OfficeDeactivated {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        office_id: Ulid,
        name: String,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
    },
    RoomDeactivated {
        id: Ulid,
    },
    SeatCreated {
        id: Ulid,
        room_id: Ulid,
        number: u32,
    },
    SeatUpdated {
        id: Ulid,
        number: u32,
    },
    SeatDeactivated {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        seat_id: Ulid,
        user: String,
        span: Span,
        created_at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        seat_id: Ulid,
    },
    /// Bulk expiration sweep: `(booking_id, seat_id)` pairs flipped inactive.
    BookingsExpired {
        entries: Vec<(Ulid, Ulid)>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfficeInfo {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub office_id: Ulid,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub number: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub seat_id: Ulid,
    pub user: String,
    pub start: Ms,
    pub end: Ms,
    pub created_at: Ms,
    pub is_active: bool,
}

/// Free slots for one seat, as produced by the room availability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSlots {
    pub seat_id: Ulid,
    pub slots: Vec<Span>,
}

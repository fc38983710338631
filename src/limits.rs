//! Hard input bounds. These are sanity caps, not business rules — the
//! business rules (working hours, booking duration) live in `config`.

use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_LOCATION_LEN: usize = 100;

pub const MAX_OFFICES: usize = 10_000;
pub const MAX_ROOMS_PER_OFFICE: usize = 1_000;
pub const MAX_SEATS_PER_ROOM: usize = 1_000;
pub const MAX_BOOKINGS_PER_SEAT: usize = 10_000;

pub const MAX_PAGE_SIZE: usize = 1_000;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z. Timestamps past this are client bugs.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

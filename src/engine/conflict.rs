use ulid::Ulid;

use crate::config::Settings;
use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// First active booking overlapping the candidate span, if any.
///
/// Bookings past their end_time but not yet swept still count as active
/// here; call sites where that staleness matters run the expiration sweep
/// first. The caller serializes access via the seat lock.
pub fn conflicting_booking(seat: &SeatState, span: &Span) -> Option<Ulid> {
    seat.overlapping(span).find(|b| b.is_active).map(|b| b.id)
}

pub fn has_conflict(seat: &SeatState, span: &Span) -> bool {
    conflicting_booking(seat, span).is_some()
}

/// Validate a requested booking window against policy: ordering, duration
/// bounds, not-in-past, and timestamp sanity.
pub(crate) fn validate_window(
    settings: &Settings,
    start: Ms,
    end: Ms,
    now: Ms,
) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if start >= end {
        return Err(EngineError::Validation("start_time must be before end_time"));
    }
    let duration = end - start;
    if duration < settings.min_booking_ms() {
        return Err(EngineError::Validation(
            "Booking is shorter than the minimum duration.",
        ));
    }
    if duration > settings.max_booking_ms() {
        return Err(EngineError::Validation("Booking duration exceeds limit."));
    }
    if start < now {
        return Err(EngineError::Validation("Cannot book in the past."));
    }
    Ok(())
}

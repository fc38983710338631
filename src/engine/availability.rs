use chrono::NaiveDate;

use crate::config::Settings;
use crate::model::*;

use super::conflict::has_conflict;
use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Candidate slot walk for one working day: slots of `step` ms starting at
/// `first`, none extending past `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrid {
    pub first: Ms,
    pub limit: Ms,
    pub step: Ms,
}

/// Derive the candidate grid for `date`.
///
/// The first candidate starts at the configured work-day start; when `date`
/// is today in the server timezone it is clamped forward to the next full
/// hour after `now`, so slots already underway are never offered.
pub fn slot_grid(settings: &Settings, date: NaiveDate, now: Ms) -> Result<SlotGrid, EngineError> {
    let work = settings.work_window(date).ok_or(EngineError::Validation(
        "date is not representable in the configured timezone",
    ))?;
    let mut first = work.start;
    if date == settings.local_date(now) {
        first = first.max(settings.next_full_hour(now));
    }
    Ok(SlotGrid {
        first,
        limit: work.end,
        step: settings.slot_step_ms(),
    })
}

/// Free slots on one seat: every grid candidate that no active booking on
/// this seat overlaps. The scan is scoped to the given seat — a booking on
/// another seat never hides slots here.
pub fn available_slots(seat: &SeatState, grid: &SlotGrid) -> Vec<Span> {
    let mut slots = Vec::new();
    let mut start = grid.first;
    while start + grid.step <= grid.limit {
        let candidate = Span::new(start, start + grid.step);
        if !has_conflict(seat, &candidate) {
            slots.push(candidate);
        }
        start += grid.step;
    }
    slots
}

mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{available_slots, slot_grid, SlotGrid};
pub use conflict::{conflicting_booking, has_conflict};
pub(crate) use conflict::now_ms;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::config::Settings;
use crate::model::*;
use crate::wal::Wal;

pub type SharedSeatState = Arc<RwLock<SeatState>>;

// ── WAL writer task ──────────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompaction {
        done: oneshot::Sender<u64>,
    },
}

/// Sole owner of the WAL file. Appends that arrive while an fsync is in
/// flight pile up in the channel; each loop turn drains whatever has queued
/// and commits it with one sync, so concurrent writers share the fsync cost.
struct WalWriter {
    wal: Wal,
    rx: mpsc::Receiver<WalCommand>,
}

impl WalWriter {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            let (event, done) = match cmd {
                WalCommand::Append { event, done } => (event, done),
                other => {
                    self.control(other);
                    continue;
                }
            };

            let mut events = vec![event];
            let mut waiting = vec![done];
            let mut deferred = None;
            while let Ok(next) = self.rx.try_recv() {
                match next {
                    WalCommand::Append { event, done } => {
                        events.push(event);
                        waiting.push(done);
                    }
                    other => {
                        // Commit the batch before anything touches the file layout
                        deferred = Some(other);
                        break;
                    }
                }
            }
            self.commit(&events, waiting);
            if let Some(cmd) = deferred {
                self.control(cmd);
            }
        }
    }

    /// Buffer the whole batch, fsync once, and hand every waiter the shared
    /// outcome.
    fn commit(&mut self, events: &[Event], waiting: Vec<oneshot::Sender<io::Result<()>>>) {
        let started = std::time::Instant::now();
        let mut outcome = Ok(());
        for event in events {
            if let Err(e) = self.wal.push(event) {
                outcome = Err(e);
                break;
            }
        }
        // Sync even when buffering failed: the batch was reported dead, so
        // none of its bytes may linger into the next one.
        let synced = self.wal.sync();
        if outcome.is_ok() {
            outcome = synced;
        }
        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(events.len() as f64);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        for done in waiting {
            let shared = match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = done.send(shared);
        }
    }

    fn control(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { events, done } => {
                let result = Wal::stage_compaction(self.wal.path(), &events)
                    .and_then(|()| self.wal.adopt_compaction());
                let _ = done.send(result);
            }
            WalCommand::AppendsSinceCompaction { done } => {
                let _ = done.send(self.wal.appends_since_compaction());
            }
            WalCommand::Append { .. } => unreachable!("appends are batched in run()"),
        }
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub settings: Arc<Settings>,
    pub(super) offices: DashMap<Ulid, Office>,
    pub(super) rooms: DashMap<Ulid, Room>,
    pub(super) seats: DashMap<Ulid, SharedSeatState>,
    /// Parent → children indexes for O(1) child lookups.
    pub(super) rooms_by_office: DashMap<Ulid, Vec<Ulid>>,
    pub(super) seats_by_room: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: booking id → seat id.
    pub(super) booking_to_seat: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a booking event directly to a SeatState (no locking — caller holds
/// the lock). A create racing a cascade deactivation may land after the
/// deactivation in the WAL; materializing it with the seat's current flag
/// keeps replay and live state identical.
fn apply_booking(seat: &mut SeatState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            seat_id,
            user,
            span,
            created_at,
        } => {
            seat.insert_booking(Booking {
                id: *id,
                user: user.clone(),
                span: *span,
                created_at: *created_at,
                is_active: seat.is_active,
            });
            index.insert(*id, *seat_id);
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = seat.booking_mut(*id) {
                b.is_active = false;
            }
        }
        _ => {}
    }
}

/// Soft-delete a seat: the seat and all of its bookings go inactive.
pub(super) fn deactivate_seat_state(seat: &mut SeatState) {
    seat.is_active = false;
    for b in seat.bookings.iter_mut() {
        b.is_active = false;
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: Arc<Settings>) -> io::Result<Self> {
        let events = Wal::load(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(WalWriter { wal, rx: wal_rx }.run());

        let engine = Self {
            settings,
            offices: DashMap::new(),
            rooms: DashMap::new(),
            seats: DashMap::new(),
            rooms_by_office: DashMap::new(),
            seats_by_room: DashMap::new(),
            booking_to_seat: DashMap::new(),
            wal_tx,
        };

        // Nobody else holds these Arcs during replay, so every try_write
        // succeeds immediately. blocking_write would panic here — replay
        // runs inside the async runtime.
        for event in &events {
            match event {
                Event::OfficeCreated { .. }
                | Event::OfficeUpdated { .. }
                | Event::RoomCreated { .. }
                | Event::RoomUpdated { .. }
                | Event::SeatCreated { .. } => engine.apply_catalog(event),
                Event::SeatUpdated { id, number } => {
                    if let Some(arc) = engine.seat_arc_opt(id) {
                        arc.try_write().expect("replay: uncontended write").number = *number;
                    }
                }
                Event::OfficeDeactivated { id } => engine.replay_deactivate_office(id),
                Event::RoomDeactivated { id } => engine.replay_deactivate_room(id),
                Event::SeatDeactivated { id } => engine.replay_deactivate_seat(id),
                Event::BookingCreated { seat_id, .. } | Event::BookingCancelled { seat_id, .. } => {
                    if let Some(arc) = engine.seat_arc_opt(seat_id) {
                        let mut guard = arc.try_write().expect("replay: uncontended write");
                        apply_booking(&mut guard, event, &engine.booking_to_seat);
                    }
                }
                Event::BookingsExpired { entries } => {
                    for (booking_id, seat_id) in entries {
                        if let Some(arc) = engine.seat_arc_opt(seat_id) {
                            let mut guard = arc.try_write().expect("replay: uncontended write");
                            if let Some(b) = guard.booking_mut(*booking_id) {
                                b.is_active = false;
                            }
                        }
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Hand an event to the writer task and wait for its durability ack.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (done, ack) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                done,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer is gone".into()))?;
        match ack.await {
            Ok(result) => result.map_err(|e| EngineError::WalError(e.to_string())),
            Err(_) => Err(EngineError::WalError("WAL writer dropped the ack".into())),
        }
    }

    /// WAL-append + apply in one call, with the seat write lock held by the
    /// caller. This is the commit step of the per-seat critical section.
    pub(super) async fn persist_and_apply_seat(
        &self,
        seat: &mut SeatState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_booking(seat, event, &self.booking_to_seat);
        Ok(())
    }

    pub(super) fn seat_arc_opt(&self, id: &Ulid) -> Option<SharedSeatState> {
        self.seats.get(id).map(|e| e.value().clone())
    }

    pub(super) fn seat_arc(&self, id: &Ulid) -> Result<SharedSeatState, EngineError> {
        self.seat_arc_opt(id).ok_or(EngineError::NotFound(*id))
    }

    /// Apply a catalog creation/update event. Shared by the live mutation
    /// paths and WAL replay; validation happens before the event is logged.
    pub(super) fn apply_catalog(&self, event: &Event) {
        match event {
            Event::OfficeCreated { id, name, location } => {
                self.offices.insert(
                    *id,
                    Office {
                        id: *id,
                        name: name.clone(),
                        location: location.clone(),
                        is_active: true,
                    },
                );
            }
            Event::OfficeUpdated { id, name, location } => {
                if let Some(mut office) = self.offices.get_mut(id) {
                    office.name = name.clone();
                    office.location = location.clone();
                }
            }
            Event::RoomCreated { id, office_id, name } => {
                self.rooms.insert(
                    *id,
                    Room {
                        id: *id,
                        office_id: *office_id,
                        name: name.clone(),
                        is_active: true,
                    },
                );
                self.rooms_by_office.entry(*office_id).or_default().push(*id);
            }
            Event::RoomUpdated { id, name } => {
                if let Some(mut room) = self.rooms.get_mut(id) {
                    room.name = name.clone();
                }
            }
            Event::SeatCreated { id, room_id, number } => {
                self.seats.insert(
                    *id,
                    Arc::new(RwLock::new(SeatState::new(*id, *room_id, *number))),
                );
                self.seats_by_room.entry(*room_id).or_default().push(*id);
            }
            _ => {}
        }
    }

    // Replay-only cascade application: the engine is solely owned, so the
    // seat locks are uncontended.

    fn replay_deactivate_office(&self, id: &Ulid) {
        if let Some(mut office) = self.offices.get_mut(id) {
            office.is_active = false;
        }
        let room_ids = self
            .rooms_by_office
            .get(id)
            .map(|v| v.clone())
            .unwrap_or_default();
        for room_id in room_ids {
            self.replay_deactivate_room(&room_id);
        }
    }

    fn replay_deactivate_room(&self, id: &Ulid) {
        if let Some(mut room) = self.rooms.get_mut(id) {
            room.is_active = false;
        }
        let seat_ids = self
            .seats_by_room
            .get(id)
            .map(|v| v.clone())
            .unwrap_or_default();
        for seat_id in seat_ids {
            self.replay_deactivate_seat(&seat_id);
        }
    }

    fn replay_deactivate_seat(&self, id: &Ulid) {
        if let Some(arc) = self.seat_arc_opt(id) {
            let mut guard = arc.try_write().expect("replay: uncontended write");
            deactivate_seat_state(&mut guard);
        }
    }
}

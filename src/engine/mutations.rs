use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{conflicting_booking, now_ms, validate_window};
use super::{deactivate_seat_state, Engine, EngineError, WalCommand};
use tokio::sync::oneshot;

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog: offices ─────────────────────────────────────

    pub async fn create_office(
        &self,
        name: String,
        location: String,
    ) -> Result<OfficeInfo, EngineError> {
        validate_name(&name)?;
        if location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
        if self.offices.len() >= MAX_OFFICES {
            return Err(EngineError::LimitExceeded("too many offices"));
        }

        let id = Ulid::new();
        let event = Event::OfficeCreated {
            id,
            name: name.clone(),
            location: location.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(OfficeInfo {
            id,
            name,
            location,
            is_active: true,
        })
    }

    pub async fn update_office(
        &self,
        id: Ulid,
        name: String,
        location: String,
    ) -> Result<OfficeInfo, EngineError> {
        validate_name(&name)?;
        if location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
        if !self.offices.get(&id).is_some_and(|o| o.is_active) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::OfficeUpdated {
            id,
            name: name.clone(),
            location: location.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(OfficeInfo {
            id,
            name,
            location,
            is_active: true,
        })
    }

    /// Soft-delete an office. Cascades to its rooms, their seats, and the
    /// seats' still-active bookings.
    pub async fn deactivate_office(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.offices.get(&id).is_some_and(|o| o.is_active) {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::OfficeDeactivated { id }).await?;

        if let Some(mut office) = self.offices.get_mut(&id) {
            office.is_active = false;
        }
        let room_ids = self
            .rooms_by_office
            .get(&id)
            .map(|v| v.clone())
            .unwrap_or_default();
        for room_id in room_ids {
            self.cascade_deactivate_room(room_id).await;
        }
        Ok(())
    }

    // ── Catalog: rooms ───────────────────────────────────────

    pub async fn create_room(&self, office_id: Ulid, name: String) -> Result<RoomInfo, EngineError> {
        validate_name(&name)?;
        if !self.offices.get(&office_id).is_some_and(|o| o.is_active) {
            return Err(EngineError::NotFound(office_id));
        }
        if self
            .rooms_by_office
            .get(&office_id)
            .is_some_and(|v| v.len() >= MAX_ROOMS_PER_OFFICE)
        {
            return Err(EngineError::LimitExceeded("too many rooms in office"));
        }

        let id = Ulid::new();
        let event = Event::RoomCreated {
            id,
            office_id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(RoomInfo {
            id,
            office_id,
            name,
            is_active: true,
        })
    }

    pub async fn update_room(&self, id: Ulid, name: String) -> Result<RoomInfo, EngineError> {
        validate_name(&name)?;
        let office_id = match self.rooms.get(&id) {
            Some(room) if room.is_active => room.office_id,
            _ => return Err(EngineError::NotFound(id)),
        };

        let event = Event::RoomUpdated {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(RoomInfo {
            id,
            office_id,
            name,
            is_active: true,
        })
    }

    pub async fn deactivate_room(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.rooms.get(&id).is_some_and(|r| r.is_active) {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::RoomDeactivated { id }).await?;
        self.cascade_deactivate_room(id).await;
        Ok(())
    }

    async fn cascade_deactivate_room(&self, id: Ulid) {
        if let Some(mut room) = self.rooms.get_mut(&id) {
            room.is_active = false;
        }
        let seat_ids = self
            .seats_by_room
            .get(&id)
            .map(|v| v.clone())
            .unwrap_or_default();
        for seat_id in seat_ids {
            if let Some(arc) = self.seat_arc_opt(&seat_id) {
                let mut guard = arc.write().await;
                deactivate_seat_state(&mut guard);
            }
        }
    }

    // ── Catalog: seats ───────────────────────────────────────

    pub async fn create_seat(&self, room_id: Ulid, number: u32) -> Result<SeatInfo, EngineError> {
        if !self.rooms.get(&room_id).is_some_and(|r| r.is_active) {
            return Err(EngineError::NotFound(room_id));
        }
        if self
            .seats_by_room
            .get(&room_id)
            .is_some_and(|v| v.len() >= MAX_SEATS_PER_ROOM)
        {
            return Err(EngineError::LimitExceeded("too many seats in room"));
        }

        let id = Ulid::new();
        let event = Event::SeatCreated { id, room_id, number };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(SeatInfo {
            id,
            room_id,
            number,
            is_active: true,
        })
    }

    pub async fn update_seat(&self, id: Ulid, number: u32) -> Result<SeatInfo, EngineError> {
        let arc = self.seat_arc(&id)?;
        let mut guard = arc.write().await;
        if !guard.is_active {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::SeatUpdated { id, number }).await?;
        guard.number = number;
        Ok(SeatInfo {
            id,
            room_id: guard.room_id,
            number,
            is_active: true,
        })
    }

    pub async fn deactivate_seat(&self, id: Ulid) -> Result<(), EngineError> {
        let arc = self.seat_arc(&id)?;
        let mut guard = arc.write().await;
        if !guard.is_active {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::SeatDeactivated { id }).await?;
        deactivate_seat_state(&mut guard);
        Ok(())
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Create a booking on a seat. The conflict re-check and the WAL commit
    /// happen under the seat's exclusive write lock, so two concurrent
    /// creates for overlapping windows on the same seat serialize and the
    /// loser fails with Conflict. Creates on different seats do not contend.
    pub async fn create_booking(
        &self,
        user: &str,
        seat_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        validate_window(&self.settings, start, end, now_ms())?;
        self.sweep_expired().await?;

        let arc = self.seat_arc(&seat_id)?;
        let mut guard = arc.write().await;
        if !guard.is_active {
            return Err(EngineError::NotFound(seat_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SEAT {
            return Err(EngineError::LimitExceeded("too many bookings on seat"));
        }

        let span = Span::new(start, end);
        if let Some(existing) = conflicting_booking(&guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(existing));
        }

        let id = Ulid::new();
        let created_at = now_ms();
        let event = Event::BookingCreated {
            id,
            seat_id,
            user: user.to_string(),
            span,
            created_at,
        };
        self.persist_and_apply_seat(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);

        Ok(BookingInfo {
            id,
            seat_id,
            user: user.to_string(),
            start,
            end,
            created_at,
            is_active: true,
        })
    }

    /// Cancel a booking owned by `user`. The lookup is restricted to the
    /// caller's own active bookings, so a foreign, unknown, or already
    /// inactive booking id is uniformly NotFound.
    pub async fn cancel_booking(&self, user: &str, booking_id: Ulid) -> Result<(), EngineError> {
        let seat_id = self
            .booking_to_seat
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(booking_id))?;
        let arc = self.seat_arc(&seat_id)?;
        let mut guard = arc.write().await;

        let owned_active = guard
            .bookings
            .iter()
            .any(|b| b.id == booking_id && b.user == user && b.is_active);
        if !owned_active {
            return Err(EngineError::NotFound(booking_id));
        }

        let event = Event::BookingCancelled {
            id: booking_id,
            seat_id,
        };
        self.persist_and_apply_seat(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        Ok(())
    }

    /// Flip every active booking whose end has passed to inactive, as one
    /// bulk WAL event. Idempotent; runs at the top of every booking-reading
    /// operation and periodically from the background sweeper. Seats whose
    /// lock is momentarily contended are picked up by the next sweep.
    pub async fn sweep_expired(&self) -> Result<usize, EngineError> {
        let now = now_ms();
        let mut entries: Vec<(Ulid, Ulid)> = Vec::new();
        for entry in self.seats.iter() {
            if let Ok(guard) = entry.value().try_read() {
                for b in &guard.bookings {
                    if b.is_active && b.span.end < now {
                        entries.push((b.id, guard.id));
                    }
                }
            }
        }
        if entries.is_empty() {
            return Ok(0);
        }

        let count = entries.len();
        self.wal_append(&Event::BookingsExpired {
            entries: entries.clone(),
        })
        .await?;
        for (booking_id, seat_id) in entries {
            if let Some(arc) = self.seat_arc_opt(&seat_id) {
                let mut guard = arc.write().await;
                if let Some(b) = guard.booking_mut(booking_id) {
                    b.is_active = false;
                }
            }
        }
        metrics::counter!(observability::BOOKINGS_EXPIRED_TOTAL).increment(count as u64);
        Ok(count)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: creations, then the cancellations and
    /// deactivations that reproduce every inactive flag.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let mut deactivations = Vec::new();

        for entry in self.offices.iter() {
            let office = entry.value();
            events.push(Event::OfficeCreated {
                id: office.id,
                name: office.name.clone(),
                location: office.location.clone(),
            });
            if !office.is_active {
                deactivations.push(Event::OfficeDeactivated { id: office.id });
            }
        }
        for entry in self.rooms.iter() {
            let room = entry.value();
            events.push(Event::RoomCreated {
                id: room.id,
                office_id: room.office_id,
                name: room.name.clone(),
            });
            if !room.is_active {
                deactivations.push(Event::RoomDeactivated { id: room.id });
            }
        }

        let seat_arcs: Vec<_> = self.seats.iter().map(|e| e.value().clone()).collect();
        let mut cancellations = Vec::new();
        for arc in seat_arcs {
            let guard = arc.read().await;
            events.push(Event::SeatCreated {
                id: guard.id,
                room_id: guard.room_id,
                number: guard.number,
            });
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    seat_id: guard.id,
                    user: b.user.clone(),
                    span: b.span,
                    created_at: b.created_at,
                });
                if !b.is_active {
                    cancellations.push(Event::BookingCancelled {
                        id: b.id,
                        seat_id: guard.id,
                    });
                }
            }
            if !guard.is_active {
                deactivations.push(Event::SeatDeactivated { id: guard.id });
            }
        }

        events.extend(cancellations);
        events.extend(deactivations);

        let (done, ack) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, done })
            .await
            .map_err(|_| EngineError::WalError("WAL writer is gone".into()))?;
        match ack.await {
            Ok(result) => result.map_err(|e| EngineError::WalError(e.to_string())),
            Err(_) => Err(EngineError::WalError("WAL writer dropped the ack".into())),
        }
    }

    pub async fn wal_appends_since_compaction(&self) -> u64 {
        let (done, ack) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompaction { done })
            .await
            .is_err()
        {
            return 0;
        }
        ack.await.unwrap_or(0)
    }
}

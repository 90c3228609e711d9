use std::sync::Arc;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{RoomStore, SharedRoomState, StoreError};

fn check_guest(guest: &GuestDetails) -> Result<(), StoreError> {
    let fields = [
        ("first_name", &guest.first_name),
        ("last_name", &guest.last_name),
        ("email", &guest.email),
        ("phone", &guest.phone),
    ];
    for (field, value) in fields {
        if value.chars().count() > MAX_FIELD_LEN {
            return Err(StoreError::violation(field, "value too long"));
        }
    }
    Ok(())
}

impl RoomStore {
    pub async fn insert_room(&self, room_name: String) -> Result<Room, StoreError> {
        let room_name = room_name.trim().to_string();
        if room_name.is_empty() || room_name.chars().count() > MAX_FIELD_LEN {
            return Err(StoreError::violation("room_name", "must be 1..=255 characters"));
        }

        let creating = Arc::clone(&self.room_create).lock_owned().await;
        if self.tables.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::violation("room_name", "too many rooms"));
        }
        if self.tables.room_names.contains_key(&room_name) {
            return Err(StoreError::violation(
                "room_name",
                format!("{room_name:?} already exists"),
            ));
        }

        let now = now_ms();
        let room = Room {
            id: Ulid::new(),
            room_name,
            created_at: now,
            updated_at: now,
        };
        let event = Event::RoomCreated { room: room.clone() };
        let created = room.clone();
        self.persist_then(event, move |tables, _| {
            tables.add_room(created);
            drop(creating);
        })
        .await?;
        Ok(room)
    }

    pub async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        check_guest(&new.guest)?;
        let rs = self
            .room(&new.room_id)
            .ok_or_else(|| StoreError::violation("room_id", format!("no room {}", new.room_id)))?;
        let guard = rs.write_owned().await;

        let now = now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            guest: new.guest,
            room_id: new.room_id,
            span: new.span,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationInserted {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(guard, event).await?;
        Ok(reservation)
    }

    /// The overlap check and the insert run under the room's write lock, so
    /// two racing inserts for the same nights cannot both succeed.
    pub async fn insert_restriction(&self, new: NewRestriction) -> Result<RoomRestriction, StoreError> {
        let rs = self
            .room(&new.room_id)
            .ok_or_else(|| StoreError::violation("room_id", format!("no room {}", new.room_id)))?;
        let guard = rs.write_owned().await;

        if let Some(reservation_id) = new.reservation_id {
            let linked_room = self
                .tables
                .reservations
                .get(&reservation_id)
                .map(|r| r.room_id)
                .ok_or_else(|| {
                    StoreError::violation("reservation_id", format!("no reservation {reservation_id}"))
                })?;
            if linked_room != new.room_id {
                return Err(StoreError::violation(
                    "room_id",
                    format!("reservation {reservation_id} is for room {linked_room}"),
                ));
            }
            if self.tables.reservation_restriction.contains_key(&reservation_id) {
                return Err(StoreError::violation(
                    "reservation_id",
                    format!("reservation {reservation_id} already has a restriction"),
                ));
            }
        }

        if let Some(existing) = guard.overlapping(&new.span).next() {
            return Err(StoreError::violation(
                "span",
                format!(
                    "{}..{} overlaps restriction {}",
                    new.span.start_str(),
                    new.span.end_str(),
                    existing.id
                ),
            ));
        }

        let now = now_ms();
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id: new.room_id,
            span: new.span,
            reservation_id: new.reservation_id,
            kind: new.kind,
            created_at: now,
            updated_at: now,
        };
        let event = Event::RestrictionInserted {
            restriction: restriction.clone(),
        };
        self.persist_and_apply(guard, event).await?;
        Ok(restriction)
    }

    /// Reservation-linked restrictions go away only with their reservation.
    pub async fn remove_restriction(&self, id: Ulid) -> Result<(), StoreError> {
        let not_found = StoreError::NotFound {
            entity: "room_restriction",
            id,
        };
        let room_id = self
            .tables
            .restriction_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or_else(|| not_found.clone())?;
        let rs = self.room(&room_id).ok_or_else(|| not_found.clone())?;
        let guard = rs.write_owned().await;

        let restriction = guard
            .restrictions
            .iter()
            .find(|r| r.id == id)
            .ok_or(not_found)?;
        if let Some(reservation_id) = restriction.reservation_id {
            return Err(StoreError::violation(
                "reservation_id",
                format!("restriction {id} belongs to reservation {reservation_id}"),
            ));
        }

        let event = Event::RestrictionRemoved { id, room_id };
        self.persist_and_apply(guard, event).await
    }

    pub async fn update_reservation(&self, id: Ulid, guest: GuestDetails) -> Result<Reservation, StoreError> {
        check_guest(&guest)?;
        let rs = self.reservation_room(id)?;
        let guard = rs.write_owned().await;
        self.ensure_reservation(id)?;

        let event = Event::ReservationUpdated {
            id,
            guest,
            updated_at: now_ms(),
        };
        self.persist_and_apply(guard, event).await?;
        self.get_reservation(id).await
    }

    pub async fn set_processed(&self, id: Ulid, processed: bool) -> Result<(), StoreError> {
        let rs = self.reservation_room(id)?;
        let guard = rs.write_owned().await;
        self.ensure_reservation(id)?;

        let event = Event::ReservationProcessed {
            id,
            processed,
            updated_at: now_ms(),
        };
        self.persist_and_apply(guard, event).await
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        let rs = self.reservation_room(id)?;
        let guard = rs.write_owned().await;
        self.ensure_reservation(id)?;

        let event = Event::ReservationDeleted { id };
        self.persist_and_apply(guard, event).await
    }

    /// Room handle of an existing reservation. Reservation writes all take
    /// this room's write lock.
    fn reservation_room(&self, id: Ulid) -> Result<SharedRoomState, StoreError> {
        let room_id = self.reservation_room_id(id)?;
        self.room(&room_id)
            .ok_or(StoreError::NotFound { entity: "room", id: room_id })
    }

    fn reservation_room_id(&self, id: Ulid) -> Result<Ulid, StoreError> {
        self.tables
            .reservations
            .get(&id)
            .map(|r| r.room_id)
            .ok_or(StoreError::NotFound {
                entity: "reservation",
                id,
            })
    }

    /// Re-check under the room lock; a concurrent delete may have won.
    fn ensure_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        self.reservation_room_id(id).map(|_| ())
    }
}

mod error;
mod fixture;
mod journal;
mod mutations;
mod queries;

pub use error::StoreError;
pub use fixture::{Fault, FlakyStore, StoreOp};

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use journal::{journal_writer_loop, JournalEntry};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Capability interface over the rooms / reservations / room_restrictions
/// tables. Implemented by [`RoomStore`] (in-memory or journaled) and by the
/// [`FlakyStore`] fixture.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_room(&self, room_name: String) -> Result<Room, StoreError>;
    async fn get_room(&self, id: Ulid) -> Result<Room, StoreError>;
    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Rooms with no restriction overlapping `span`, ordered by name.
    async fn rooms_available(&self, span: DateSpan) -> Result<Vec<Room>, StoreError>;
    /// `NotFound` if the room does not exist.
    async fn is_room_available(&self, room_id: Ulid, span: DateSpan) -> Result<bool, StoreError>;
    async fn restrictions_for_room(
        &self,
        room_id: Ulid,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError>;

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError>;
    /// Fails with a `span` violation if any restriction on the room overlaps.
    async fn insert_restriction(&self, new: NewRestriction) -> Result<RoomRestriction, StoreError>;
    async fn remove_restriction(&self, id: Ulid) -> Result<(), StoreError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError>;
    /// Newest first.
    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError>;
    /// Unprocessed reservations, newest first.
    async fn new_reservations(&self) -> Result<Vec<Reservation>, StoreError>;
    async fn update_reservation(&self, id: Ulid, guest: GuestDetails) -> Result<Reservation, StoreError>;
    async fn set_processed(&self, id: Ulid, processed: bool) -> Result<(), StoreError>;
    /// Deletes the reservation together with its linked restriction.
    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError>;
    /// Reservations with no linked restriction.
    async fn orphaned_reservations(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Owner-imposed hold on a room; same non-overlap rule as bookings.
    async fn add_owner_block(&self, room_id: Ulid, span: DateSpan) -> Result<RoomRestriction, StoreError> {
        self.insert_restriction(NewRestriction {
            room_id,
            span,
            reservation_id: None,
            kind: RestrictionKind::OwnerBlock,
        })
        .await
    }
}

/// Run one store call under a time budget; expiry becomes `Unavailable`.
pub async fn bounded<T>(
    budget: Duration,
    op: &'static str,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "{op} timed out after {}ms",
            budget.as_millis()
        ))),
    }
}

/// Room, reservation and restriction tables held in memory, optionally
/// journaled to a WAL so they survive restarts.
pub struct RoomStore {
    tables: Arc<Tables>,
    /// Serializes room creation so a name is checked and claimed in one step.
    room_create: Arc<Mutex<()>>,
    journal: Option<mpsc::Sender<JournalEntry>>,
}

/// Row maps shared with the task that applies a journaled event.
#[derive(Default)]
struct Tables {
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Room name → room id; names are unique.
    room_names: DashMap<String, Ulid>,
    reservations: DashMap<Ulid, Reservation>,
    /// Restriction id → room id.
    restriction_room: DashMap<Ulid, Ulid>,
    /// Reservation id → the restriction that blocks it.
    reservation_restriction: DashMap<Ulid, Ulid>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl RoomStore {
    /// Store without a journal. State lives as long as the value.
    pub fn in_memory() -> Self {
        Self {
            tables: Arc::new(Tables::default()),
            room_create: Arc::new(Mutex::new(())),
            journal: None,
        }
    }

    /// Replay the WAL at `path` and start its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(wal, rx));

        let mut store = Self::in_memory();
        for event in &events {
            store.tables.replay(event);
        }
        store.journal = Some(tx);
        tracing::info!(
            path = %path.display(),
            records = events.len(),
            rooms = store.tables.rooms.len(),
            reservations = store.tables.reservations.len(),
            "store opened"
        );
        Ok(store)
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    fn room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.tables.room(id)
    }

    /// Make `event` durable, then run `apply`. With a journal both steps run
    /// on their own task, so a caller that stops waiting (a timeout, a
    /// dropped request) cannot leave the WAL holding a record that memory
    /// never saw. Anything `apply` owns, such as a room write guard, is
    /// released only after it has run.
    async fn persist_then<F>(&self, event: Event, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Tables, &Event) + Send + 'static,
    {
        let Some(journal) = self.journal.clone() else {
            apply(&*self.tables, &event);
            return Ok(());
        };
        let tables = Arc::clone(&self.tables);
        tokio::spawn(async move {
            journal_append(&journal, &event).await?;
            apply(&*tables, &event);
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("journal task failed: {e}")))?
    }

    /// Journal then apply a room-scoped event. The guard is moved into the
    /// write so the room stays locked until the event is applied.
    async fn persist_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<RoomState>,
        event: Event,
    ) -> Result<(), StoreError> {
        self.persist_then(event, move |tables, event| tables.apply(&mut guard, event))
            .await
    }
}

/// Write the event to the WAL and wait for it to be durable.
async fn journal_append(journal: &mpsc::Sender<JournalEntry>, event: &Event) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    journal
        .send(JournalEntry {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
    rx.await
        .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))?
        .map_err(|e| StoreError::Unavailable(format!("journal write failed: {e}")))
}

impl Tables {
    fn room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Apply a room-scoped event to `rs` and the row indexes.
    fn apply(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::ReservationInserted { reservation } => {
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationUpdated {
                id,
                guest,
                updated_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.guest = guest.clone();
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationProcessed {
                id,
                processed,
                updated_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.processed = *processed;
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationDeleted { id } => {
                self.reservations.remove(id);
                if let Some((_, restriction_id)) = self.reservation_restriction.remove(id) {
                    rs.remove_restriction(restriction_id);
                    self.restriction_room.remove(&restriction_id);
                }
            }
            Event::RestrictionInserted { restriction } => {
                self.restriction_room.insert(restriction.id, restriction.room_id);
                if let Some(reservation_id) = restriction.reservation_id {
                    self.reservation_restriction.insert(reservation_id, restriction.id);
                }
                rs.insert_restriction(restriction.clone());
            }
            Event::RestrictionRemoved { id, .. } => {
                if let Some(removed) = rs.remove_restriction(*id)
                    && let Some(reservation_id) = removed.reservation_id
                {
                    self.reservation_restriction.remove(&reservation_id);
                }
                self.restriction_room.remove(id);
            }
            // Rooms are added by `add_room`, outside any room lock.
            Event::RoomCreated { .. } => {}
        }
    }

    fn add_room(&self, room: Room) {
        self.room_names.insert(room.room_name.clone(), room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    /// Rebuild state from one WAL record. We are the sole owner of every Arc
    /// during replay, so `try_write` never contends.
    fn replay(&self, event: &Event) {
        if let Event::RoomCreated { room } = event {
            self.add_room(room.clone());
            return;
        }
        let Some(room_id) = self.event_room_id(event) else {
            tracing::warn!("WAL replay skipped record for unknown row: {event:?}");
            return;
        };
        let Some(rs) = self.room(&room_id) else {
            tracing::warn!(%room_id, "WAL replay skipped record for unknown room");
            return;
        };
        match rs.try_write() {
            Ok(mut guard) => self.apply(&mut guard, event),
            Err(_) => tracing::error!(%room_id, "WAL replay found a locked room"),
        }
    }

    fn event_room_id(&self, event: &Event) -> Option<Ulid> {
        match event {
            Event::RoomCreated { room } => Some(room.id),
            Event::ReservationInserted { reservation } => Some(reservation.room_id),
            Event::ReservationUpdated { id, .. }
            | Event::ReservationProcessed { id, .. }
            | Event::ReservationDeleted { id } => self.reservations.get(id).map(|r| r.room_id),
            Event::RestrictionInserted { restriction } => Some(restriction.room_id),
            Event::RestrictionRemoved { room_id, .. } => Some(*room_id),
        }
    }
}

#[async_trait]
impl Store for RoomStore {
    async fn insert_room(&self, room_name: String) -> Result<Room, StoreError> {
        RoomStore::insert_room(self, room_name).await
    }

    async fn get_room(&self, id: Ulid) -> Result<Room, StoreError> {
        RoomStore::get_room(self, id).await
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        RoomStore::all_rooms(self).await
    }

    async fn rooms_available(&self, span: DateSpan) -> Result<Vec<Room>, StoreError> {
        RoomStore::rooms_available(self, span).await
    }

    async fn is_room_available(&self, room_id: Ulid, span: DateSpan) -> Result<bool, StoreError> {
        RoomStore::is_room_available(self, room_id, span).await
    }

    async fn restrictions_for_room(
        &self,
        room_id: Ulid,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        RoomStore::restrictions_for_room(self, room_id, span).await
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        RoomStore::insert_reservation(self, new).await
    }

    async fn insert_restriction(&self, new: NewRestriction) -> Result<RoomRestriction, StoreError> {
        RoomStore::insert_restriction(self, new).await
    }

    async fn remove_restriction(&self, id: Ulid) -> Result<(), StoreError> {
        RoomStore::remove_restriction(self, id).await
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        RoomStore::get_reservation(self, id).await
    }

    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        RoomStore::all_reservations(self).await
    }

    async fn new_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        RoomStore::new_reservations(self).await
    }

    async fn update_reservation(&self, id: Ulid, guest: GuestDetails) -> Result<Reservation, StoreError> {
        RoomStore::update_reservation(self, id, guest).await
    }

    async fn set_processed(&self, id: Ulid, processed: bool) -> Result<(), StoreError> {
        RoomStore::set_processed(self, id, processed).await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        RoomStore::delete_reservation(self, id).await
    }

    async fn orphaned_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        RoomStore::orphaned_reservations(self).await
    }
}

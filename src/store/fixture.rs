use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

/// Operations a [`FlakyStore`] can fail or count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertRoom,
    GetRoom,
    AllRooms,
    RoomsAvailable,
    IsRoomAvailable,
    RestrictionsForRoom,
    InsertReservation,
    InsertRestriction,
    RemoveRestriction,
    GetReservation,
    AllReservations,
    NewReservations,
    UpdateReservation,
    SetProcessed,
    DeleteReservation,
    OrphanedReservations,
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail immediately with `Unavailable`.
    Unavailable,
    /// Fail immediately with the given error.
    Error(StoreError),
    /// Sleep before delegating; long enough to trip a caller's time budget.
    Stall(Duration),
}

/// Test fixture: delegates to `inner`, counting calls and injecting faults
/// into chosen operations.
pub struct FlakyStore<S> {
    inner: S,
    faults: DashMap<StoreOp, Fault>,
    calls: DashMap<StoreOp, usize>,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail(&self, op: StoreOp, fault: Fault) {
        self.faults.insert(op, fault);
    }

    pub fn heal(&self, op: StoreOp) {
        self.faults.remove(&op);
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.get(&op).map_or(0, |c| *c)
    }

    /// Total calls to operations that write.
    pub fn writes(&self) -> usize {
        [
            StoreOp::InsertRoom,
            StoreOp::InsertReservation,
            StoreOp::InsertRestriction,
            StoreOp::RemoveRestriction,
            StoreOp::UpdateReservation,
            StoreOp::SetProcessed,
            StoreOp::DeleteReservation,
        ]
        .into_iter()
        .map(|op| self.calls(op))
        .sum()
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;
        let fault = self.faults.get(&op).map(|f| f.value().clone());
        match fault {
            None => Ok(()),
            Some(Fault::Unavailable) => Err(StoreError::Unavailable(format!("injected fault in {op:?}"))),
            Some(Fault::Error(e)) => Err(e),
            Some(Fault::Stall(d)) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for FlakyStore<S> {
    async fn insert_room(&self, room_name: String) -> Result<Room, StoreError> {
        self.enter(StoreOp::InsertRoom).await?;
        self.inner.insert_room(room_name).await
    }

    async fn get_room(&self, id: Ulid) -> Result<Room, StoreError> {
        self.enter(StoreOp::GetRoom).await?;
        self.inner.get_room(id).await
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.enter(StoreOp::AllRooms).await?;
        self.inner.all_rooms().await
    }

    async fn rooms_available(&self, span: DateSpan) -> Result<Vec<Room>, StoreError> {
        self.enter(StoreOp::RoomsAvailable).await?;
        self.inner.rooms_available(span).await
    }

    async fn is_room_available(&self, room_id: Ulid, span: DateSpan) -> Result<bool, StoreError> {
        self.enter(StoreOp::IsRoomAvailable).await?;
        self.inner.is_room_available(room_id, span).await
    }

    async fn restrictions_for_room(
        &self,
        room_id: Ulid,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        self.enter(StoreOp::RestrictionsForRoom).await?;
        self.inner.restrictions_for_room(room_id, span).await
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        self.enter(StoreOp::InsertReservation).await?;
        self.inner.insert_reservation(new).await
    }

    async fn insert_restriction(&self, new: NewRestriction) -> Result<RoomRestriction, StoreError> {
        self.enter(StoreOp::InsertRestriction).await?;
        self.inner.insert_restriction(new).await
    }

    async fn remove_restriction(&self, id: Ulid) -> Result<(), StoreError> {
        self.enter(StoreOp::RemoveRestriction).await?;
        self.inner.remove_restriction(id).await
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.enter(StoreOp::GetReservation).await?;
        self.inner.get_reservation(id).await
    }

    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.enter(StoreOp::AllReservations).await?;
        self.inner.all_reservations().await
    }

    async fn new_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.enter(StoreOp::NewReservations).await?;
        self.inner.new_reservations().await
    }

    async fn update_reservation(&self, id: Ulid, guest: GuestDetails) -> Result<Reservation, StoreError> {
        self.enter(StoreOp::UpdateReservation).await?;
        self.inner.update_reservation(id, guest).await
    }

    async fn set_processed(&self, id: Ulid, processed: bool) -> Result<(), StoreError> {
        self.enter(StoreOp::SetProcessed).await?;
        self.inner.set_processed(id, processed).await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteReservation).await?;
        self.inner.delete_reservation(id).await
    }

    async fn orphaned_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.enter(StoreOp::OrphanedReservations).await?;
        self.inner.orphaned_reservations().await
    }
}

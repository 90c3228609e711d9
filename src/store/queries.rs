use ulid::Ulid;

use crate::model::*;

use super::{RoomStore, SharedRoomState, StoreError};

fn room_not_found(id: Ulid) -> StoreError {
    StoreError::NotFound { entity: "room", id }
}

fn newest_first(mut rows: Vec<Reservation>) -> Vec<Reservation> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    rows
}

impl RoomStore {
    /// Snapshot of every room handle, so no map guard is held across an await.
    fn room_handles(&self) -> Vec<SharedRoomState> {
        self.tables.rooms.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_room(&self, id: Ulid) -> Result<Room, StoreError> {
        let rs = self.room(&id).ok_or_else(|| room_not_found(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms = Vec::with_capacity(self.tables.rooms.len());
        for rs in self.room_handles() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.room_name.cmp(&b.room_name).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    pub async fn rooms_available(&self, span: DateSpan) -> Result<Vec<Room>, StoreError> {
        let mut free = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if guard.is_free(&span) {
                free.push(guard.room.clone());
            }
        }
        free.sort_by(|a, b| a.room_name.cmp(&b.room_name).then(a.id.cmp(&b.id)));
        Ok(free)
    }

    pub async fn is_room_available(&self, room_id: Ulid, span: DateSpan) -> Result<bool, StoreError> {
        let rs = self.room(&room_id).ok_or_else(|| room_not_found(room_id))?;
        let guard = rs.read().await;
        Ok(guard.is_free(&span))
    }

    pub async fn restrictions_for_room(
        &self,
        room_id: Ulid,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        let rs = self.room(&room_id).ok_or_else(|| room_not_found(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(&span).cloned().collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.tables.reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound {
                entity: "reservation",
                id,
            })
    }

    pub async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(newest_first(
            self.tables.reservations.iter().map(|r| r.value().clone()).collect(),
        ))
    }

    pub async fn new_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(newest_first(
            self.tables.reservations
                .iter()
                .filter(|r| !r.processed)
                .map(|r| r.value().clone())
                .collect(),
        ))
    }

    pub async fn orphaned_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(newest_first(
            self.tables.reservations
                .iter()
                .filter(|r| !self.tables.reservation_restriction.contains_key(r.key()))
                .map(|r| r.value().clone())
                .collect(),
        ))
    }
}

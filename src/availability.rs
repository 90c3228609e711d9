use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use crate::error::BookingError;
use crate::forms::FormErrors;
use crate::limits::MAX_STAY_NIGHTS;
use crate::model::{DateSpan, Room};
use crate::observability::{AVAILABILITY_QUERIES_TOTAL, AVAILABILITY_QUERY_DURATION_SECONDS};
use crate::store::{bounded, Store};

/// Read-only availability queries over the store, each under a time budget.
///
/// A room is free for `[start, end)` iff none of its restrictions satisfies
/// `r.start < end && r.end > start`. Owner blocks and guest reservations are
/// both restrictions, so they compose through that one predicate.
#[derive(Clone)]
pub struct Availability {
    store: Arc<dyn Store>,
    budget: Duration,
}

impl Availability {
    pub fn new(store: Arc<dyn Store>, budget: Duration) -> Self {
        Self { store, budget }
    }

    /// Every room free for the whole span. Empty is a normal answer.
    pub async fn rooms_available(&self, span: DateSpan) -> Result<Vec<Room>, BookingError> {
        check_window(&span)?;
        let started = Instant::now();
        let result = bounded(self.budget, "rooms_available", self.store.rooms_available(span)).await;
        record("rooms_available", started, result.is_ok());

        result.map_err(|e| {
            tracing::error!(
                start = %span.start, end = %span.end,
                "availability search failed: {e}"
            );
            e.into()
        })
    }

    /// An unknown room id is `NotFound`, never "unavailable".
    pub async fn is_room_available(&self, room_id: Ulid, span: DateSpan) -> Result<bool, BookingError> {
        check_window(&span)?;
        let started = Instant::now();
        let result = bounded(
            self.budget,
            "is_room_available",
            self.store.is_room_available(room_id, span),
        )
        .await;
        record("is_room_available", started, result.is_ok());

        result.map_err(|e| {
            if !matches!(e, crate::store::StoreError::NotFound { .. }) {
                tracing::error!(
                    %room_id, start = %span.start, end = %span.end,
                    "room availability check failed: {e}"
                );
            }
            e.into()
        })
    }

    pub async fn room(&self, room_id: Ulid) -> Result<Room, BookingError> {
        bounded(self.budget, "get_room", self.store.get_room(room_id))
            .await
            .map_err(|e| {
                if !matches!(e, crate::store::StoreError::NotFound { .. }) {
                    tracing::error!(%room_id, "room lookup failed: {e}");
                }
                e.into()
            })
    }
}

fn check_window(span: &DateSpan) -> Result<(), BookingError> {
    if span.nights() > MAX_STAY_NIGHTS {
        let mut errors = FormErrors::default();
        errors.add("end", format!("Stays are limited to {MAX_STAY_NIGHTS} nights"));
        return Err(BookingError::Validation(errors));
    }
    Ok(())
}

fn record(query: &'static str, started: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "query" => query, "status" => status).increment(1);
    metrics::histogram!(AVAILABILITY_QUERY_DURATION_SECONDS, "query" => query)
        .record(started.elapsed().as_secs_f64());
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::availability::Availability;
use crate::error::{BookingError, CommitStage};
use crate::mail::{MailMessage, Mailer};
use crate::model::{NewReservation, NewRestriction, Reservation, RestrictionKind};
use crate::observability::{
    COMMITS_TOTAL, COMMIT_DURATION_SECONDS, COMMIT_FAILURES_TOTAL, COMMIT_ROLLBACKS_TOTAL,
    ORPHANED_RESERVATIONS_TOTAL,
};
use crate::store::{bounded, Store, StoreError};

/// Writes a reservation and its blocking restriction as one all-or-nothing
/// step, then queues the guest confirmation.
///
/// The restriction insert re-checks overlap under the room's write lock, so
/// two visitors who both saw the room free cannot both commit. When that
/// second write fails the reservation row is deleted again; only if the
/// delete also fails is a row left behind, and that is logged and counted.
#[derive(Clone)]
pub struct Committer {
    store: Arc<dyn Store>,
    availability: Availability,
    mailer: Mailer,
    budget: Duration,
}

impl Committer {
    pub fn new(store: Arc<dyn Store>, mailer: Mailer, budget: Duration) -> Self {
        Self {
            availability: Availability::new(store.clone(), budget),
            store,
            mailer,
            budget,
        }
    }

    /// Runs on its own task, so a caller that goes away (a dropped request)
    /// cannot stop the commit between its two writes.
    pub async fn commit(&self, new: NewReservation) -> Result<Reservation, BookingError> {
        let this = self.clone();
        tokio::spawn(async move { this.run(new).await })
            .await
            .unwrap_or_else(|e| {
                Err(BookingError::CommitFailed {
                    stage: CommitStage::Reservation,
                    source: StoreError::Unavailable(format!("commit task failed: {e}")),
                })
            })
    }

    async fn run(&self, new: NewReservation) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.write_both(new).await;
        match &result {
            Ok(reservation) => {
                metrics::counter!(COMMITS_TOTAL).increment(1);
                self.notify(reservation).await;
            }
            Err(e) => {
                let stage = match e {
                    BookingError::CommitFailed { stage, .. } => stage.label(),
                    _ => CommitStage::Precheck.label(),
                };
                metrics::counter!(COMMIT_FAILURES_TOTAL, "stage" => stage).increment(1);
            }
        }
        metrics::histogram!(COMMIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn write_both(&self, new: NewReservation) -> Result<Reservation, BookingError> {
        let (room_id, span) = (new.room_id, new.span);

        if !self.availability.is_room_available(room_id, span).await? {
            return Err(BookingError::CommitFailed {
                stage: CommitStage::Precheck,
                source: StoreError::violation("span", "room is no longer available"),
            });
        }

        // The write keeps running past the budget; if it lands late it is
        // deleted again, so a failed commit leaves no reservation behind.
        let store = Arc::clone(&self.store);
        let mut insert = tokio::spawn(async move { store.insert_reservation(new).await });
        let written = match tokio::time::timeout(self.budget, &mut insert).await {
            Ok(joined) => joined.unwrap_or_else(|e| {
                Err(StoreError::Unavailable(format!("reservation write task failed: {e}")))
            }),
            Err(_) => {
                self.reclaim_late_reservation(insert);
                Err(StoreError::Unavailable(format!(
                    "insert_reservation timed out after {}ms",
                    self.budget.as_millis()
                )))
            }
        };
        let reservation = written.map_err(|source| {
            tracing::error!(
                %room_id, start = %span.start, end = %span.end,
                "reservation write failed: {source}"
            );
            BookingError::CommitFailed {
                stage: CommitStage::Reservation,
                source,
            }
        })?;

        let restriction = NewRestriction {
            room_id,
            span,
            reservation_id: Some(reservation.id),
            kind: RestrictionKind::Reservation,
        };
        if let Err(source) =
            bounded(self.budget, "insert_restriction", self.store.insert_restriction(restriction)).await
        {
            if source.is_overlap() {
                tracing::warn!(
                    %room_id, start = %span.start, end = %span.end,
                    "room taken between availability check and commit"
                );
            } else {
                tracing::error!(
                    %room_id, start = %span.start, end = %span.end,
                    "restriction write failed: {source}"
                );
            }
            self.roll_back(&reservation).await;
            return Err(BookingError::CommitFailed {
                stage: CommitStage::Restriction,
                source,
            });
        }

        tracing::info!(
            reservation_id = %reservation.id, %room_id,
            start = %span.start, end = %span.end,
            "reservation committed"
        );
        Ok(reservation)
    }

    fn reclaim_late_reservation(&self, insert: JoinHandle<Result<Reservation, StoreError>>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Ok(Ok(reservation)) = insert.await {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    "reservation written after its commit timed out"
                );
                this.roll_back(&reservation).await;
            }
        });
    }

    async fn roll_back(&self, reservation: &Reservation) {
        let id = reservation.id;
        match bounded(self.budget, "delete_reservation", self.store.delete_reservation(id)).await {
            Ok(()) => {
                metrics::counter!(COMMIT_ROLLBACKS_TOTAL).increment(1);
                tracing::warn!(reservation_id = %id, "rolled back reservation after restriction failure");
            }
            Err(e) => {
                metrics::counter!(ORPHANED_RESERVATIONS_TOTAL).increment(1);
                tracing::error!(
                    reservation_id = %id, room_id = %reservation.room_id,
                    "rollback failed, reservation has no restriction: {e}"
                );
            }
        }
    }

    /// Waits for queue space; the commit itself is already durable.
    async fn notify(&self, reservation: &Reservation) {
        let message = MailMessage::confirmation(reservation, self.mailer.from());
        if let Err(e) = self.mailer.enqueue(message).await {
            metrics::counter!(crate::observability::MAIL_FAILED_TOTAL).increment(1);
            tracing::error!(reservation_id = %reservation.id, "{e}");
        }
    }
}

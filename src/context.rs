use std::sync::Arc;

use tokio::sync::mpsc;

use crate::availability::Availability;
use crate::commit::Committer;
use crate::config::Config;
use crate::mail::{MailMessage, Mailer};
use crate::render::{JsonRenderer, Renderer};
use crate::session::MemorySessions;
use crate::store::{bounded, RoomStore, Store, StoreError};
use crate::workflow::Workflow;

/// Everything a request needs, built once at startup and shared via `Arc`.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<MemorySessions>,
    pub renderer: Arc<dyn Renderer>,
    pub workflow: Workflow,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        mailer: Mailer,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let budget = config.store_timeout;
        let workflow = Workflow::new(
            Availability::new(store.clone(), budget),
            Committer::new(store.clone(), mailer, budget),
        );
        Self {
            sessions: Arc::new(MemorySessions::new(config.session_lifetime)),
            config,
            store,
            renderer,
            workflow,
        }
    }

    /// Unjournaled store, JSON renderer, and the receiving end of the mail
    /// queue in place of a worker.
    pub fn in_memory(config: Config) -> (Self, mpsc::Receiver<MailMessage>) {
        let (mailer, rx) = Mailer::channel(config.mail_queue_capacity, config.mail_from.clone());
        let ctx = Self::new(
            config,
            Arc::new(RoomStore::in_memory()),
            mailer,
            Arc::new(JsonRenderer),
        );
        (ctx, rx)
    }

    /// Create the configured rooms if the store has none. Returns how many
    /// were created.
    pub async fn seed_rooms(&self) -> Result<usize, StoreError> {
        let budget = self.config.store_timeout;
        if !bounded(budget, "all_rooms", self.store.all_rooms()).await?.is_empty() {
            return Ok(0);
        }
        for name in &self.config.rooms {
            let room = bounded(budget, "insert_room", self.store.insert_room(name.clone())).await?;
            tracing::info!(room_id = %room.id, room_name = %room.room_name, "seeded room");
        }
        Ok(self.config.rooms.len())
    }

    /// Log every reservation that has no restriction blocking its room.
    pub async fn report_orphans(&self) -> Result<usize, StoreError> {
        let budget = self.config.store_timeout;
        let orphans = bounded(budget, "orphaned_reservations", self.store.orphaned_reservations()).await?;
        for r in &orphans {
            tracing::error!(
                reservation_id = %r.id, room_id = %r.room_id,
                start = %r.span.start, end = %r.span.end,
                "reservation has no room restriction"
            );
        }
        Ok(orphans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateSpan, GuestDetails, NewReservation};

    #[tokio::test]
    async fn seeds_only_an_empty_store() {
        let config = Config {
            rooms: vec!["A".into(), "B".into()],
            ..Config::default()
        };
        let (ctx, _rx) = AppContext::in_memory(config);
        assert_eq!(ctx.seed_rooms().await.unwrap(), 2);
        assert_eq!(ctx.seed_rooms().await.unwrap(), 0);
        assert_eq!(ctx.store.all_rooms().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reports_orphans() {
        let (ctx, _rx) = AppContext::in_memory(Config::default());
        ctx.seed_rooms().await.unwrap();
        let room = ctx.store.all_rooms().await.unwrap()[0].clone();
        ctx.store
            .insert_reservation(NewReservation {
                guest: GuestDetails::default(),
                room_id: room.id,
                span: DateSpan::parse("2021-07-18", "2021-07-20").unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(ctx.report_orphans().await.unwrap(), 1);
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::Reservation;
use crate::observability::{MAIL_DELIVERED_TOTAL, MAIL_ENQUEUED_TOTAL, MAIL_FAILED_TOTAL};

pub const CONFIRMATION_SUBJECT: &str = "Reservation Confirmation";
pub const BASIC_TEMPLATE: &str = "basic.html";

/// An outbound message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    pub template: String,
}

impl MailMessage {
    /// Guest confirmation for a committed reservation.
    pub fn confirmation(reservation: &Reservation, from: &str) -> Self {
        let content = format!(
            "<strong>Reservation Confirmation</strong><br>\n\
             Dear {}, <br>\n\
             This is to confirm your reservation from {} to {}",
            reservation.guest.first_name,
            reservation.span.start_str(),
            reservation.span.end_str(),
        );
        Self {
            to: reservation.guest.email.clone(),
            from: from.to_string(),
            subject: CONFIRMATION_SUBJECT.to_string(),
            content,
            template: BASIC_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Delivery backend driven by the mail worker.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Writes each message to the log instead of sending it.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, message: &MailMessage) -> Result<(), MailError> {
        tracing::info!(
            subject = %message.subject,
            template = %message.template,
            bytes = message.content.len(),
            "mail delivered to log transport"
        );
        Ok(())
    }
}

/// The worker is gone and the message was not queued.
#[derive(Debug)]
pub struct MailQueueClosed(pub MailMessage);

impl std::fmt::Display for MailQueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail queue closed, {:?} not sent", self.0.subject)
    }
}

impl std::error::Error for MailQueueClosed {}

/// Sending half of the bounded outbound mail queue.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::Sender<MailMessage>,
    from: String,
}

impl Mailer {
    pub fn channel(capacity: usize, from: impl Into<String>) -> (Self, mpsc::Receiver<MailMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                from: from.into(),
            },
            rx,
        )
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    /// Queue `message`, waiting for space when the queue is full. Never drops.
    pub async fn enqueue(&self, message: MailMessage) -> Result<(), MailQueueClosed> {
        self.tx
            .send(message)
            .await
            .map_err(|mpsc::error::SendError(m)| MailQueueClosed(m))?;
        metrics::counter!(MAIL_ENQUEUED_TOTAL).increment(1);
        Ok(())
    }
}

/// Drains the queue into `transport` until every [`Mailer`] is dropped.
/// Failed deliveries are logged and counted, not retried.
pub async fn run_mail_worker(mut rx: mpsc::Receiver<MailMessage>, transport: Arc<dyn MailTransport>) {
    while let Some(message) = rx.recv().await {
        match transport.deliver(&message).await {
            Ok(()) => {
                metrics::counter!(MAIL_DELIVERED_TOTAL).increment(1);
            }
            Err(e) => {
                metrics::counter!(MAIL_FAILED_TOTAL).increment(1);
                tracing::error!(subject = %message.subject, "{e}");
            }
        }
    }
    tracing::debug!("mail queue closed, worker exiting");
}

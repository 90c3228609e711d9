use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{DateSpan, GuestDetails};
use crate::session::SessionPayload;

/// Session key the draft lives under.
pub const DRAFT_KEY: &str = "reservation";

/// A booking in progress, carried in the visitor's session between steps.
///
/// The dates are set by search (or the direct-booking link), the room by
/// choose-room, the guest fields by the reservation form. `reservation_id`
/// is set after a commit has written both rows and queued the confirmation,
/// and marks the draft as committed for the summary page and for
/// resubmissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub span: DateSpan,
    pub room_id: Option<Ulid>,
    pub room_name: Option<String>,
    pub guest: GuestDetails,
    pub reservation_id: Option<Ulid>,
}

impl SessionPayload for ReservationDraft {
    const TAG: &'static str = "reservation_draft";
    const VERSION: u32 = 1;
}

impl ReservationDraft {
    pub fn new(span: DateSpan) -> Self {
        Self {
            span,
            room_id: None,
            room_name: None,
            guest: GuestDetails::default(),
            reservation_id: None,
        }
    }

    pub fn with_room(span: DateSpan, room_id: Ulid, room_name: String) -> Self {
        Self {
            room_id: Some(room_id),
            room_name: Some(room_name),
            ..Self::new(span)
        }
    }

    pub fn is_committed(&self) -> bool {
        self.reservation_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        MemorySessions, Session, SessionEntry, SessionId, SessionStateError, SessionStore,
    };
    use chrono::NaiveDate;
    use std::time::Duration;

    fn span() -> DateSpan {
        DateSpan::new(
            NaiveDate::from_ymd_opt(2021, 7, 18).unwrap(),
            NaiveDate::from_ymd_opt(2021, 7, 20).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn draft_survives_the_session() {
        let sessions = MemorySessions::new(Duration::from_secs(60));
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        let room = Ulid::new();
        let mut draft = ReservationDraft::with_room(span(), room, "General's Quarters".into());
        draft.guest.first_name = "Mubeen".into();
        session.put(DRAFT_KEY, &draft).unwrap();

        let back: ReservationDraft = session.get(DRAFT_KEY).unwrap();
        assert_eq!(back, draft);
        assert!(!back.is_committed());
    }

    #[tokio::test]
    async fn notice_under_draft_key_is_wrong_type() {
        let sessions = MemorySessions::new(Duration::from_secs(60));
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);
        sessions.put(
            &id,
            DRAFT_KEY,
            SessionEntry {
                tag: "notice".into(),
                version: 1,
                body: serde_json::json!("stale"),
            },
        )
        .unwrap();
        assert!(matches!(
            session.get::<ReservationDraft>(DRAFT_KEY),
            Err(SessionStateError::WrongType { expected: "reservation_draft", .. })
        ));
    }
}

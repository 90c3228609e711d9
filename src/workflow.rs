use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::availability::Availability;
use crate::commit::Committer;
use crate::draft::{ReservationDraft, DRAFT_KEY};
use crate::error::BookingError;
use crate::forms::{Form, FormErrors};
use crate::limits::{MAX_FIELD_LEN, MIN_FIRST_NAME_LEN};
use crate::model::{DateSpan, GuestDetails, NewReservation, SpanError};
use crate::observability::SESSION_STATE_ERRORS_TOTAL;
use crate::render::TemplateData;
use crate::session::{NoticeKind, Session, SessionStateError};

pub const HOME_VIEW: &str = "home.page.html";
pub const SEARCH_VIEW: &str = "search-availability.page.html";
pub const CHOOSE_ROOM_VIEW: &str = "choose-room.page.html";
pub const RESERVATION_VIEW: &str = "make-reservation.page.html";
pub const SUMMARY_VIEW: &str = "reservation-summary.page.html";

pub const HOME_PATH: &str = "/";
pub const SEARCH_PATH: &str = "/search-availability";
pub const RESERVATION_PATH: &str = "/make-reservation";
pub const SUMMARY_PATH: &str = "/reservation-summary";

const NO_DRAFT: &str = "Cannot get reservation from session";
const NO_AVAILABILITY: &str = "No availability";
const ROOM_TAKEN: &str = "This room was just booked by someone else, please choose another";
const ROOM_NOT_FOUND: &str = "Room not found";
const TRY_AGAIN: &str = "We could not complete your request, please try again";
const BAD_LINK: &str = "Invalid booking link";

/// What a workflow step wants the HTTP layer to do.
#[derive(Debug)]
pub enum Outcome {
    /// Render `view`; pending notices are already popped into `data`.
    Render { view: &'static str, data: TemplateData },
    /// 303 See Other.
    Redirect(String),
    Json { status: u16, body: AvailabilityReply },
}

/// Machine-readable answer for one room and date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReply {
    pub available: bool,
    pub message: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
}

/// The multi-step booking flow:
/// search → choose room → guest details → commit → summary.
///
/// Each step reads and writes the visitor's [`ReservationDraft`] through the
/// session. A step that needs a draft and finds none (expired session,
/// out-of-order navigation, foreign value under the key) sends the visitor
/// back to the entry page with one error notice.
#[derive(Clone)]
pub struct Workflow {
    availability: Availability,
    committer: Committer,
}

impl Workflow {
    pub fn new(availability: Availability, committer: Committer) -> Self {
        Self {
            availability,
            committer,
        }
    }

    pub fn home(&self, session: &Session<'_>) -> Outcome {
        render(session, HOME_VIEW, TemplateData::default())
    }

    pub fn search_page(&self, session: &Session<'_>) -> Outcome {
        render(session, SEARCH_VIEW, TemplateData::default())
    }

    pub async fn post_availability(&self, session: &Session<'_>, start: &str, end: &str) -> Outcome {
        let mut form = Form::new(HashMap::from([
            ("start".to_string(), start.to_string()),
            ("end".to_string(), end.to_string()),
        ]));

        let span = match DateSpan::parse(start, end) {
            Ok(span) => span,
            Err(e) => {
                form.errors.add(span_error_field(e), e.to_string());
                return render(session, SEARCH_VIEW, TemplateData::with_form(form));
            }
        };

        let rooms = match self.availability.rooms_available(span).await {
            Ok(rooms) => rooms,
            Err(BookingError::Validation(errors)) => {
                form.errors = errors;
                return render(session, SEARCH_VIEW, TemplateData::with_form(form));
            }
            Err(_) => return notice_redirect(session, NoticeKind::Error, TRY_AGAIN, SEARCH_PATH),
        };

        if rooms.is_empty() {
            return notice_redirect(session, NoticeKind::Error, NO_AVAILABILITY, SEARCH_PATH);
        }

        if let Err(e) = session.put(DRAFT_KEY, &ReservationDraft::new(span)) {
            return precondition_failed(session, "post_availability", e);
        }
        let data = TemplateData::default()
            .value("rooms", &rooms)
            .string("start_date", span.start_str())
            .string("end_date", span.end_str());
        render(session, CHOOSE_ROOM_VIEW, data)
    }

    /// Never touches the session.
    pub async fn availability_json(&self, start: &str, end: &str, room_id: &str) -> Outcome {
        let reply = |status: u16, available: bool, message: &str| Outcome::Json {
            status,
            body: AvailabilityReply {
                available,
                message: message.to_string(),
                room_id: room_id.to_string(),
                start_date: start.to_string(),
                end_date: end.to_string(),
            },
        };

        let span = match DateSpan::parse(start, end) {
            Ok(span) => span,
            Err(e) => return reply(400, false, &e.to_string()),
        };
        let Ok(id) = Ulid::from_string(room_id.trim()) else {
            return reply(400, false, "room_id is not a valid id");
        };

        match self.availability.is_room_available(id, span).await {
            Ok(true) => reply(200, true, "Room is available"),
            Ok(false) => reply(200, false, "Room is not available for these dates"),
            Err(BookingError::NotFound { .. }) => reply(404, false, "room not found"),
            Err(BookingError::Validation(errors)) => {
                let message = errors.get("end").unwrap_or("invalid date range").to_string();
                reply(400, false, &message)
            }
            Err(_) => reply(503, false, "availability could not be checked"),
        }
    }

    pub async fn choose_room(&self, session: &Session<'_>, room_id: &str) -> Outcome {
        let mut draft = match load_draft(session, "choose_room") {
            Ok(draft) => draft,
            Err(outcome) => return outcome,
        };
        let Ok(id) = Ulid::from_string(room_id.trim()) else {
            return notice_redirect(session, NoticeKind::Error, ROOM_NOT_FOUND, SEARCH_PATH);
        };
        let room = match self.availability.room(id).await {
            Ok(room) => room,
            Err(BookingError::NotFound { .. }) => {
                return notice_redirect(session, NoticeKind::Error, ROOM_NOT_FOUND, SEARCH_PATH);
            }
            Err(_) => return notice_redirect(session, NoticeKind::Error, TRY_AGAIN, SEARCH_PATH),
        };

        draft.room_id = Some(room.id);
        draft.room_name = Some(room.room_name);
        draft.reservation_id = None;
        if let Err(e) = session.put(DRAFT_KEY, &draft) {
            return precondition_failed(session, "choose_room", e);
        }
        Outcome::Redirect(RESERVATION_PATH.into())
    }

    /// Direct link `?id=&s=&e=`: seeds a fresh draft as if the visitor had
    /// searched and chosen the room.
    pub async fn book_room(&self, session: &Session<'_>, room_id: &str, start: &str, end: &str) -> Outcome {
        let (Ok(id), Ok(span)) = (Ulid::from_string(room_id.trim()), DateSpan::parse(start, end)) else {
            return notice_redirect(session, NoticeKind::Error, BAD_LINK, HOME_PATH);
        };
        let room = match self.availability.room(id).await {
            Ok(room) => room,
            Err(BookingError::NotFound { .. }) => {
                return notice_redirect(session, NoticeKind::Error, ROOM_NOT_FOUND, HOME_PATH);
            }
            Err(_) => return notice_redirect(session, NoticeKind::Error, TRY_AGAIN, HOME_PATH),
        };

        let draft = ReservationDraft::with_room(span, room.id, room.room_name);
        if let Err(e) = session.put(DRAFT_KEY, &draft) {
            return precondition_failed(session, "book_room", e);
        }
        Outcome::Redirect(RESERVATION_PATH.into())
    }

    pub fn reservation_form(&self, session: &Session<'_>) -> Outcome {
        let (draft, _) = match load_chosen_draft(session, "reservation_form") {
            Ok(chosen) => chosen,
            Err(outcome) => return outcome,
        };
        if draft.is_committed() {
            return Outcome::Redirect(SUMMARY_PATH.into());
        }
        let form = Form::new(guest_values(&draft.guest));
        render(session, RESERVATION_VIEW, draft_data(TemplateData::with_form(form), &draft))
    }

    pub async fn post_reservation(&self, session: &Session<'_>, values: HashMap<String, String>) -> Outcome {
        let (draft, room_id) = match load_chosen_draft(session, "post_reservation") {
            Ok(chosen) => chosen,
            Err(outcome) => return outcome,
        };
        if draft.is_committed() {
            return Outcome::Redirect(SUMMARY_PATH.into());
        }

        let mut form = Form::new(values);
        form.required(&["first_name", "last_name", "email"]);
        form.min_length("first_name", MIN_FIRST_NAME_LEN);
        form.is_email("email");
        for field in ["first_name", "last_name", "email", "phone"] {
            form.max_length(field, MAX_FIELD_LEN);
        }
        if !form.valid() {
            return render(session, RESERVATION_VIEW, draft_data(TemplateData::with_form(form), &draft));
        }

        let guest = GuestDetails {
            first_name: form.get("first_name").trim().to_string(),
            last_name: form.get("last_name").trim().to_string(),
            email: form.get("email").trim().to_string(),
            phone: form.get("phone").trim().to_string(),
        };
        let new = NewReservation {
            guest: guest.clone(),
            room_id,
            span: draft.span,
        };

        match self.committer.commit(new).await {
            Ok(reservation) => {
                let committed = ReservationDraft {
                    guest,
                    reservation_id: Some(reservation.id),
                    ..draft
                };
                if let Err(e) = session.put(DRAFT_KEY, &committed) {
                    tracing::error!(reservation_id = %reservation.id, "committed draft not stored: {e}");
                }
                Outcome::Redirect(SUMMARY_PATH.into())
            }
            Err(BookingError::Validation(errors)) => {
                form.errors = merge(form.errors, errors);
                render(session, RESERVATION_VIEW, draft_data(TemplateData::with_form(form), &draft))
            }
            Err(e) if e.is_booking_conflict() => {
                notice_redirect(session, NoticeKind::Error, ROOM_TAKEN, SEARCH_PATH)
            }
            Err(BookingError::NotFound { .. }) => {
                notice_redirect(session, NoticeKind::Error, ROOM_NOT_FOUND, HOME_PATH)
            }
            Err(_) => notice_redirect(session, NoticeKind::Error, TRY_AGAIN, HOME_PATH),
        }
    }

    /// Shows the committed reservation once, then drops the draft.
    pub fn summary(&self, session: &Session<'_>) -> Outcome {
        let draft = match load_draft(session, "summary") {
            Ok(draft) => draft,
            Err(outcome) => return outcome,
        };
        let Some(reservation_id) = draft.reservation_id else {
            let e = SessionStateError::Corrupt {
                key: DRAFT_KEY.into(),
                detail: "reservation not committed yet".into(),
            };
            return precondition_failed(session, "summary", e);
        };
        session.remove(DRAFT_KEY);

        let data = TemplateData::default()
            .string("reservation_id", reservation_id.to_string());
        render(session, SUMMARY_VIEW, draft_data(data, &draft))
    }
}

fn span_error_field(e: SpanError) -> &'static str {
    match e {
        SpanError::BadStart => "start",
        SpanError::BadEnd | SpanError::Inverted => "end",
    }
}

fn guest_values(guest: &GuestDetails) -> HashMap<String, String> {
    HashMap::from([
        ("first_name".to_string(), guest.first_name.clone()),
        ("last_name".to_string(), guest.last_name.clone()),
        ("email".to_string(), guest.email.clone()),
        ("phone".to_string(), guest.phone.clone()),
    ])
}

fn merge(mut into: FormErrors, from: FormErrors) -> FormErrors {
    for field in from.fields() {
        for message in from.all(field) {
            into.add(field, message.clone());
        }
    }
    into
}

fn draft_data(data: TemplateData, draft: &ReservationDraft) -> TemplateData {
    let data = data
        .value("reservation", draft)
        .string("start_date", draft.span.start_str())
        .string("end_date", draft.span.end_str());
    match &draft.room_name {
        Some(name) => data.string("room_name", name.clone()),
        None => data,
    }
}

fn render(session: &Session<'_>, view: &'static str, mut data: TemplateData) -> Outcome {
    data.flash = session.pop_notice(NoticeKind::Flash);
    data.warning = session.pop_notice(NoticeKind::Warning);
    data.error = session.pop_notice(NoticeKind::Error);
    Outcome::Render { view, data }
}

fn notice_redirect(session: &Session<'_>, kind: NoticeKind, message: &str, to: &str) -> Outcome {
    session.set_notice(kind, message);
    Outcome::Redirect(to.into())
}

fn precondition_failed(session: &Session<'_>, step: &'static str, e: SessionStateError) -> Outcome {
    metrics::counter!(SESSION_STATE_ERRORS_TOTAL, "step" => step).increment(1);
    tracing::warn!(session = %session.id(), step, "{e}");
    notice_redirect(session, NoticeKind::Error, NO_DRAFT, HOME_PATH)
}

fn load_draft(session: &Session<'_>, step: &'static str) -> Result<ReservationDraft, Outcome> {
    session
        .get::<ReservationDraft>(DRAFT_KEY)
        .map_err(|e| precondition_failed(session, step, e))
}

/// A draft that already has a room, with that room's id.
fn load_chosen_draft(
    session: &Session<'_>,
    step: &'static str,
) -> Result<(ReservationDraft, Ulid), Outcome> {
    let draft = load_draft(session, step)?;
    match draft.room_id {
        Some(room_id) => Ok((draft, room_id)),
        None => {
            let e = SessionStateError::Corrupt {
                key: DRAFT_KEY.into(),
                detail: "no room chosen".into(),
            };
            Err(precondition_failed(session, step, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Mailer;
    use crate::session::{MemorySessions, SessionId};
    use crate::store::{RoomStore, Store};
    use std::sync::Arc;
    use std::time::Duration;

    async fn workflow() -> (Workflow, Arc<RoomStore>, Ulid) {
        let store = Arc::new(RoomStore::in_memory());
        let room = store.insert_room("General's Quarters".into()).await.unwrap();
        let (mailer, _rx) = Mailer::channel(8, "desk@roomstay.test");
        let budget = Duration::from_secs(3);
        let wf = Workflow::new(
            Availability::new(store.clone(), budget),
            Committer::new(store.clone(), mailer, budget),
        );
        (wf, store, room.id)
    }

    fn guest_form(first: &str, email: &str) -> HashMap<String, String> {
        HashMap::from([
            ("first_name".to_string(), first.to_string()),
            ("last_name".to_string(), "Arman".to_string()),
            ("email".to_string(), email.to_string()),
            ("phone".to_string(), "555-555-5555".to_string()),
        ])
    }

    #[tokio::test]
    async fn bad_search_dates_rerender_with_field_error() {
        let (wf, _store, _room) = workflow().await;
        let sessions = MemorySessions::new(Duration::from_secs(60));
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        let Outcome::Render { view, data } = wf.post_availability(&session, "2021-07-20", "2021-07-18").await else {
            panic!("expected render");
        };
        assert_eq!(view, SEARCH_VIEW);
        assert!(data.form.unwrap().errors.get("end").is_some());
        assert!(!session.exists(DRAFT_KEY));

        let Outcome::Render { data, .. } = wf.post_availability(&session, "July 18", "2021-07-20").await else {
            panic!("expected render");
        };
        assert!(data.form.unwrap().errors.get("start").is_some());
    }

    #[tokio::test]
    async fn first_name_length_boundary() {
        let (wf, _store, room) = workflow().await;
        let sessions = MemorySessions::new(Duration::from_secs(60));
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        let link = wf.book_room(&session, &room.to_string(), "2021-07-18", "2021-07-20").await;
        assert!(matches!(link, Outcome::Redirect(ref to) if to == RESERVATION_PATH));

        let Outcome::Render { data, .. } = wf.post_reservation(&session, guest_form("Mu", "mu@example.com")).await
        else {
            panic!("expected render");
        };
        assert_eq!(
            data.form.unwrap().errors.get("first_name"),
            Some("This field must be at least 3 characters long")
        );

        let outcome = wf.post_reservation(&session, guest_form("Mub", "mu@example.com")).await;
        assert!(matches!(outcome, Outcome::Redirect(ref to) if to == SUMMARY_PATH));
    }

    #[tokio::test]
    async fn json_answers() {
        let (wf, store, room) = workflow().await;
        let span = DateSpan::parse("2021-07-18", "2021-07-20").unwrap();
        store.add_owner_block(room, span).await.unwrap();

        let status_of = |o: Outcome| match o {
            Outcome::Json { status, body } => (status, body.available),
            other => panic!("expected json, got {other:?}"),
        };
        let r = room.to_string();
        assert_eq!(status_of(wf.availability_json("2021-07-20", "2021-07-22", &r).await), (200, true));
        assert_eq!(status_of(wf.availability_json("2021-07-19", "2021-07-21", &r).await), (200, false));
        assert_eq!(
            status_of(wf.availability_json("2021-07-19", "2021-07-21", &Ulid::new().to_string()).await),
            (404, false)
        );
        assert_eq!(status_of(wf.availability_json("2021-07-21", "2021-07-19", &r).await), (400, false));
        assert_eq!(status_of(wf.availability_json("2021-07-19", "2021-07-21", "7").await), (400, false));
    }

    #[tokio::test]
    async fn summary_before_commit_is_a_precondition_failure() {
        let (wf, _store, room) = workflow().await;
        let sessions = MemorySessions::new(Duration::from_secs(60));
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        wf.book_room(&session, &room.to_string(), "2021-07-18", "2021-07-20").await;
        let outcome = wf.summary(&session);
        assert!(matches!(outcome, Outcome::Redirect(ref to) if to == HOME_PATH));
        assert_eq!(session.pop_notice(NoticeKind::Error).as_deref(), Some(NO_DRAFT));
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps only.
pub type Ms = i64;

/// Calendar date format used on every form, query string and payload.
pub const DATE_LAYOUT: &str = "%Y-%m-%d";

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open range of nights `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    /// Returns `None` unless `start < end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, SpanError> {
        let start = NaiveDate::parse_from_str(start.trim(), DATE_LAYOUT)
            .map_err(|_| SpanError::BadStart)?;
        let end =
            NaiveDate::parse_from_str(end.trim(), DATE_LAYOUT).map_err(|_| SpanError::BadEnd)?;
        Self::new(start, end).ok_or(SpanError::Inverted)
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// `self.start < other.end && self.end > other.start`; touching endpoints
    /// do not overlap.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_LAYOUT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_LAYOUT).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanError {
    BadStart,
    BadEnd,
    Inverted,
}

impl std::fmt::Display for SpanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpanError::BadStart => write!(f, "start date must be YYYY-MM-DD"),
            SpanError::BadEnd => write!(f, "end date must be YYYY-MM-DD"),
            SpanError::Inverted => write!(f, "end date must be after start date"),
        }
    }
}

impl std::error::Error for SpanError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub room_name: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Why a room is held for a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Created by committing a guest reservation.
    Reservation,
    /// Imposed by the owner (maintenance, manual hold).
    OwnerBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: DateSpan,
    pub reservation_id: Option<Ulid>,
    pub kind: RestrictionKind,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Guest-supplied contact fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub guest: GuestDetails,
    pub room_id: Ulid,
    pub span: DateSpan,
    /// `false` until an operator marks it handled.
    pub processed: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Insert payload for a reservation row; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest: GuestDetails,
    pub room_id: Ulid,
    pub span: DateSpan,
}

/// Insert payload for a restriction row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRestriction {
    pub room_id: Ulid,
    pub span: DateSpan,
    pub reservation_id: Option<Ulid>,
    pub kind: RestrictionKind,
}

/// Per-room state: the room row plus its restrictions sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    /// Insert restriction maintaining sort order by span.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: Ulid) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Restrictions whose span overlaps `query`.
    /// Everything starting at or after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.span.start < query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn is_free(&self, query: &DateSpan) -> bool {
        self.overlapping(query).next().is_none()
    }
}

/// WAL record format. Flat, one row-level change per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    ReservationInserted {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: Ulid,
        guest: GuestDetails,
        updated_at: Ms,
    },
    ReservationProcessed {
        id: Ulid,
        processed: bool,
        updated_at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
    },
    RestrictionInserted {
        restriction: RoomRestriction,
    },
    RestrictionRemoved {
        id: Ulid,
        room_id: Ulid,
    },
}

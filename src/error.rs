use ulid::Ulid;

use crate::forms::FormErrors;
use crate::session::SessionStateError;
use crate::store::StoreError;

/// Which write of a commit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    Precheck,
    Reservation,
    Restriction,
}

impl CommitStage {
    pub fn label(&self) -> &'static str {
        match self {
            CommitStage::Precheck => "precheck",
            CommitStage::Reservation => "reservation",
            CommitStage::Restriction => "restriction",
        }
    }
}

/// Engine- and workflow-level failures.
#[derive(Debug)]
pub enum BookingError {
    /// User-correctable field errors.
    Validation(FormErrors),
    NotFound { entity: &'static str, id: Ulid },
    ConstraintViolation { field: &'static str, detail: String },
    StoreUnavailable(String),
    /// Missing or mistyped Draft in the session.
    SessionState(SessionStateError),
    CommitFailed { stage: CommitStage, source: StoreError },
}

impl BookingError {
    /// The room was taken between the visitor's search and their commit.
    pub fn is_booking_conflict(&self) -> bool {
        match self {
            BookingError::CommitFailed { source, .. } => source.is_overlap(),
            BookingError::ConstraintViolation { field, .. } => *field == "span",
            _ => false,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => BookingError::NotFound { entity, id },
            StoreError::ConstraintViolation { field, detail } => {
                BookingError::ConstraintViolation { field, detail }
            }
            StoreError::Unavailable(e) => BookingError::StoreUnavailable(e),
        }
    }
}

impl From<SessionStateError> for BookingError {
    fn from(e: SessionStateError) -> Self {
        BookingError::SessionState(e)
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(errors) => {
                write!(f, "validation failed on: {}", errors.fields().join(", "))
            }
            BookingError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            BookingError::ConstraintViolation { field, detail } => {
                write!(f, "constraint violation on {field}: {detail}")
            }
            BookingError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            BookingError::SessionState(e) => write!(f, "session state: {e}"),
            BookingError::CommitFailed { stage, source } => {
                write!(f, "commit failed at {} write: {source}", stage.label())
            }
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::SessionState(e) => Some(e),
            BookingError::CommitFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

use ulid::Ulid;

/// Failures at the store boundary. The store never retries internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lookup by id found no row.
    NotFound { entity: &'static str, id: Ulid },
    /// Uniqueness, foreign-key, or non-overlap check failed on `field`.
    ConstraintViolation { field: &'static str, detail: String },
    /// Timeout, journal failure, or a backend that went away.
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn violation(field: &'static str, detail: impl Into<String>) -> Self {
        StoreError::ConstraintViolation {
            field,
            detail: detail.into(),
        }
    }

    pub fn is_overlap(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { field: "span", .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            StoreError::ConstraintViolation { field, detail } => {
                write!(f, "constraint violation on {field}: {detail}")
            }
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

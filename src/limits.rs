/// Max length of any guest text field and of a room name.
pub const MAX_FIELD_LEN: usize = 255;

/// Minimum length of a guest's first name.
pub const MIN_FIRST_NAME_LEN: usize = 3;

/// Longest stay (and widest availability query) in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

pub const MAX_ROOMS: usize = 10_000;

/// Hard cap on stored keys per session.
pub const MAX_SESSION_KEYS: usize = 32;

/// Largest WAL record payload. Every event is a single row, so anything
/// bigger on replay is a corrupt length prefix.
pub const MAX_WAL_RECORD_LEN: usize = 64 * 1024;

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ulid::Ulid;

use crate::limits::MAX_SESSION_KEYS;

/// Opaque per-visitor key carried by the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Accepts only ids this service could have issued.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Ulid::from_string(raw).ok().map(|_| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored value tagged with its type name and schema version, so a reader
/// can reject it before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub tag: String,
    pub version: u32,
    pub body: serde_json::Value,
}

/// A type that can live in the session.
pub trait SessionPayload: Serialize + DeserializeOwned {
    const TAG: &'static str;
    const VERSION: u32;
}

/// Temporary per-visitor key-value store. Writes to one key are
/// last-write-wins.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &SessionId, key: &str) -> Option<SessionEntry>;
    /// Fails with [`SessionStateError::Full`] rather than dropping the write.
    fn put(&self, id: &SessionId, key: &str, entry: SessionEntry) -> Result<(), SessionStateError>;
    fn remove(&self, id: &SessionId, key: &str) -> Option<SessionEntry>;
    fn exists(&self, id: &SessionId, key: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStateError {
    Missing { key: String },
    WrongType { key: String, expected: &'static str, found: String },
    StaleVersion { key: String, expected: u32, found: u32 },
    Corrupt { key: String, detail: String },
    /// The session already holds `limit` keys and `key` is not one of them.
    Full { key: String, limit: usize },
}

impl std::fmt::Display for SessionStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStateError::Missing { key } => write!(f, "no {key:?} in session"),
            SessionStateError::WrongType { key, expected, found } => {
                write!(f, "session {key:?} holds {found}, expected {expected}")
            }
            SessionStateError::StaleVersion { key, expected, found } => {
                write!(f, "session {key:?} is version {found}, expected {expected}")
            }
            SessionStateError::Corrupt { key, detail } => {
                write!(f, "session {key:?} could not be decoded: {detail}")
            }
            SessionStateError::Full { key, limit } => {
                write!(f, "session holds {limit} keys, cannot add {key:?}")
            }
        }
    }
}

impl std::error::Error for SessionStateError {}

/// One-shot message slots shown on the next rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Flash,
    Warning,
    Error,
}

impl NoticeKind {
    pub fn key(&self) -> &'static str {
        match self {
            NoticeKind::Flash => "flash",
            NoticeKind::Warning => "warning",
            NoticeKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Notice(String);

impl SessionPayload for Notice {
    const TAG: &'static str = "notice";
    const VERSION: u32 = 1;
}

/// Typed view of one visitor's session.
pub struct Session<'a> {
    store: &'a dyn SessionStore,
    id: &'a SessionId,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a dyn SessionStore, id: &'a SessionId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> &SessionId {
        self.id
    }

    pub fn get<T: SessionPayload>(&self, key: &str) -> Result<T, SessionStateError> {
        let entry = self
            .store
            .get(self.id, key)
            .ok_or_else(|| SessionStateError::Missing { key: key.into() })?;
        if entry.tag != T::TAG {
            return Err(SessionStateError::WrongType {
                key: key.into(),
                expected: T::TAG,
                found: entry.tag,
            });
        }
        if entry.version != T::VERSION {
            return Err(SessionStateError::StaleVersion {
                key: key.into(),
                expected: T::VERSION,
                found: entry.version,
            });
        }
        serde_json::from_value(entry.body).map_err(|e| SessionStateError::Corrupt {
            key: key.into(),
            detail: e.to_string(),
        })
    }

    pub fn put<T: SessionPayload>(&self, key: &str, value: &T) -> Result<(), SessionStateError> {
        let body = serde_json::to_value(value).map_err(|e| SessionStateError::Corrupt {
            key: key.into(),
            detail: e.to_string(),
        })?;
        self.store.put(
            self.id,
            key,
            SessionEntry {
                tag: T::TAG.into(),
                version: T::VERSION,
                body,
            },
        )
    }

    pub fn remove(&self, key: &str) {
        self.store.remove(self.id, key);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.exists(self.id, key)
    }

    /// Replaces any pending notice of the same kind.
    pub fn set_notice(&self, kind: NoticeKind, message: impl Into<String>) {
        if let Err(e) = self.put(kind.key(), &Notice(message.into())) {
            tracing::warn!(session = %self.id, "notice not stored: {e}");
        }
    }

    pub fn pop_notice(&self, kind: NoticeKind) -> Option<String> {
        let notice = self.get::<Notice>(kind.key()).ok();
        self.remove(kind.key());
        notice.map(|n| n.0)
    }
}

struct SessionRecord {
    values: HashMap<String, SessionEntry>,
    touched: Instant,
}

/// Process-local session store. Sessions idle past `lifetime` read as empty
/// and are dropped by [`crate::reaper::run_session_reaper`].
pub struct MemorySessions {
    sessions: DashMap<SessionId, SessionRecord>,
    lifetime: Duration,
}

impl MemorySessions {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle since before `now - lifetime`. Returns how many.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, record| now.duration_since(record.touched) < self.lifetime);
        let evicted = before.saturating_sub(self.sessions.len());
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        evicted
    }

    fn live(&self, record: &SessionRecord) -> bool {
        record.touched.elapsed() < self.lifetime
    }
}

impl SessionStore for MemorySessions {
    fn get(&self, id: &SessionId, key: &str) -> Option<SessionEntry> {
        let mut record = self.sessions.get_mut(id)?;
        if !self.live(&record) {
            return None;
        }
        record.touched = Instant::now();
        record.values.get(key).cloned()
    }

    fn put(&self, id: &SessionId, key: &str, entry: SessionEntry) -> Result<(), SessionStateError> {
        let mut record = self.sessions.entry(id.clone()).or_insert_with(|| SessionRecord {
            values: HashMap::new(),
            touched: Instant::now(),
        });
        if !self.live(&record) {
            record.values.clear();
        }
        record.touched = Instant::now();
        if record.values.len() >= MAX_SESSION_KEYS && !record.values.contains_key(key) {
            return Err(SessionStateError::Full {
                key: key.into(),
                limit: MAX_SESSION_KEYS,
            });
        }
        record.values.insert(key.to_string(), entry);
        Ok(())
    }

    fn remove(&self, id: &SessionId, key: &str) -> Option<SessionEntry> {
        let mut record = self.sessions.get_mut(id)?;
        record.values.remove(key)
    }

    fn exists(&self, id: &SessionId, key: &str) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|r| self.live(&r) && r.values.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: u32,
    }

    impl SessionPayload for Cart {
        const TAG: &'static str = "cart";
        const VERSION: u32 = 2;
    }

    fn store() -> MemorySessions {
        MemorySessions::new(Duration::from_secs(60))
    }

    #[test]
    fn session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert_eq!(SessionId::parse("../../etc/passwd"), None);
    }

    #[tokio::test]
    async fn typed_put_get_remove() {
        let sessions = store();
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        assert_eq!(
            session.get::<Cart>("cart"),
            Err(SessionStateError::Missing { key: "cart".into() })
        );
        session.put("cart", &Cart { items: 3 }).unwrap();
        assert!(session.exists("cart"));
        assert_eq!(session.get::<Cart>("cart").unwrap(), Cart { items: 3 });
        session.remove("cart");
        assert!(!session.exists("cart"));
    }

    #[tokio::test]
    async fn wrong_tag_is_rejected_before_decoding() {
        let sessions = store();
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);
        session.set_notice(NoticeKind::Flash, "hello");
        sessions.put(
            &id,
            "cart",
            SessionEntry {
                tag: "notice".into(),
                version: 1,
                body: serde_json::json!("hello"),
            },
        )
        .unwrap();

        let err = session.get::<Cart>("cart").unwrap_err();
        assert!(matches!(err, SessionStateError::WrongType { expected: "cart", .. }));
    }

    #[tokio::test]
    async fn stale_version_and_corrupt_body() {
        let sessions = store();
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        sessions.put(
            &id,
            "cart",
            SessionEntry {
                tag: "cart".into(),
                version: 1,
                body: serde_json::json!({ "items": 1 }),
            },
        )
        .unwrap();
        assert!(matches!(
            session.get::<Cart>("cart"),
            Err(SessionStateError::StaleVersion { expected: 2, found: 1, .. })
        ));

        sessions.put(
            &id,
            "cart",
            SessionEntry {
                tag: "cart".into(),
                version: 2,
                body: serde_json::json!({ "items": "many" }),
            },
        )
        .unwrap();
        assert!(matches!(
            session.get::<Cart>("cart"),
            Err(SessionStateError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn notices_pop_once_and_replace() {
        let sessions = store();
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);

        session.set_notice(NoticeKind::Error, "first");
        session.set_notice(NoticeKind::Error, "second");
        assert_eq!(session.pop_notice(NoticeKind::Error).as_deref(), Some("second"));
        assert_eq!(session.pop_notice(NoticeKind::Error), None);
        assert_eq!(session.pop_notice(NoticeKind::Flash), None);
    }

    #[tokio::test]
    async fn full_session_rejects_new_keys() {
        let sessions = store();
        let id = SessionId::generate();
        let session = Session::new(&sessions, &id);
        for i in 0..MAX_SESSION_KEYS {
            session.put(&format!("cart-{i}"), &Cart { items: 1 }).unwrap();
        }

        assert_eq!(
            session.put("one-more", &Cart { items: 1 }),
            Err(SessionStateError::Full {
                key: "one-more".into(),
                limit: MAX_SESSION_KEYS,
            })
        );
        assert!(!session.exists("one-more"));
        // Overwriting a key it already holds still works.
        session.put("cart-0", &Cart { items: 7 }).unwrap();
        assert_eq!(session.get::<Cart>("cart-0").unwrap(), Cart { items: 7 });
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let sessions = store();
        let (a, b) = (SessionId::generate(), SessionId::generate());
        Session::new(&sessions, &a).put("cart", &Cart { items: 1 }).unwrap();
        assert!(!Session::new(&sessions, &b).exists("cart"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let sessions = store();
        let id = SessionId::generate();
        Session::new(&sessions, &id).put("cart", &Cart { items: 1 }).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(sessions.exists(&id, "cart"));
        assert_eq!(sessions.evict_idle(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!sessions.exists(&id, "cart"));
        assert!(sessions.get(&id, "cart").is_none());
        assert_eq!(sessions.evict_idle(Instant::now()), 1);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn concurrent_writers_last_write_wins() {
        let sessions = Arc::new(store());
        let id = SessionId::generate();
        let mut handles = Vec::new();
        for items in 0..32u32 {
            let sessions = sessions.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                Session::new(sessions.as_ref(), &id)
                    .put("cart", &Cart { items })
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let cart: Cart = Session::new(sessions.as_ref(), &id).get("cart").unwrap();
        assert!(cart.items < 32);
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const PREFIX: &str = "ROOMSTAY_";

pub const WAL_FILE: &str = "roomstay.wal";

/// Runtime settings, read once at startup from `ROOMSTAY_*` variables.
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub store_timeout: Duration,
    pub mail_queue_capacity: usize,
    pub mail_from: String,
    pub session_lifetime: Duration,
    /// Marks the session cookie `Secure`.
    pub production: bool,
    /// Rooms created when the store starts empty.
    pub rooms: Vec<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            store_timeout: Duration::from_millis(3000),
            mail_queue_capacity: 64,
            mail_from: "reservations@roomstay.local".into(),
            session_lifetime: Duration::from_secs(24 * 60 * 60),
            production: false,
            rooms: vec!["General's Quarters".into(), "Major's Suite".into()],
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` receives the full variable name, e.g. `ROOMSTAY_PORT`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let parsed = |name: &str| get(name).and_then(|v| parse::<u64>(&v));
        let defaults = Self::default();

        Self {
            port: get("PORT").and_then(|v| parse(&v)).unwrap_or(defaults.port),
            bind: get("BIND").unwrap_or(defaults.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            store_timeout: parsed("STORE_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            mail_queue_capacity: get("MAIL_QUEUE_CAPACITY")
                .and_then(|v| parse::<usize>(&v))
                .filter(|n| *n > 0)
                .unwrap_or(defaults.mail_queue_capacity),
            mail_from: get("MAIL_FROM").unwrap_or(defaults.mail_from),
            session_lifetime: parsed("SESSION_LIFETIME_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_lifetime),
            production: get("PRODUCTION")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.production),
            rooms: get("ROOMS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.rooms),
            metrics_port: get("METRICS_PORT").and_then(|v| parse(&v)),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        let port = self.metrics_port?;
        format!("{}:{port}", self.bind).parse().ok()
    }
}

fn parse<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

pub mod availability;
pub mod commit;
pub mod config;
pub mod context;
pub mod draft;
pub mod error;
pub mod forms;
pub mod http;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod render;
pub mod session;
pub mod store;
pub mod wal;
pub mod workflow;

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: availability queries. Labels: query, status.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "roomstay_availability_queries_total";

/// Histogram: availability query latency in seconds. Labels: query.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "roomstay_availability_query_duration_seconds";

/// Counter: committed reservations.
pub const COMMITS_TOTAL: &str = "roomstay_commits_total";

/// Histogram: commit latency in seconds, both writes plus enqueue.
pub const COMMIT_DURATION_SECONDS: &str = "roomstay_commit_duration_seconds";

/// Counter: failed commits. Labels: stage.
pub const COMMIT_FAILURES_TOTAL: &str = "roomstay_commit_failures_total";

/// Counter: reservation rows deleted after their restriction write failed.
pub const COMMIT_ROLLBACKS_TOTAL: &str = "roomstay_commit_rollbacks_total";

/// Counter: reservation rows left without a restriction because the
/// compensating delete also failed.
pub const ORPHANED_RESERVATIONS_TOTAL: &str = "roomstay_orphaned_reservations_total";

/// Counter: workflow steps that found no usable draft in the session.
pub const SESSION_STATE_ERRORS_TOTAL: &str = "roomstay_session_state_errors_total";

/// Counter: HTTP requests. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "roomstay_http_requests_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live sessions after the last reaper pass.
pub const SESSIONS_ACTIVE: &str = "roomstay_sessions_active";

/// Counter: confirmation mails placed on the outbound queue.
pub const MAIL_ENQUEUED_TOTAL: &str = "roomstay_mail_enqueued_total";

/// Counter: mails handed to the transport.
pub const MAIL_DELIVERED_TOTAL: &str = "roomstay_mail_delivered_total";

/// Counter: mails the transport rejected.
pub const MAIL_FAILED_TOTAL: &str = "roomstay_mail_failed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomstay_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomstay_wal_flush_batch_size";

/// Install the Prometheus exporter on `addr`. No-op if `addr` is None.
pub fn init(addr: Option<SocketAddr>) -> Result<(), BuildError> {
    let Some(addr) = addr else { return Ok(()) };
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

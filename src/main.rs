use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use roomstay::config::Config;
use roomstay::context::AppContext;
use roomstay::mail::{run_mail_worker, LogTransport, Mailer};
use roomstay::render::JsonRenderer;
use roomstay::reaper::run_session_reaper;
use roomstay::store::RoomStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roomstay::observability::init(config.metrics_addr())?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(RoomStore::open(&config.wal_path())?);

    let (mailer, mail_rx) = Mailer::channel(config.mail_queue_capacity, config.mail_from.clone());
    let mail_worker = tokio::spawn(run_mail_worker(mail_rx, Arc::new(LogTransport)));

    let ctx = Arc::new(AppContext::new(config, store, mailer, Arc::new(JsonRenderer)));

    let seeded = ctx.seed_rooms().await?;
    if seeded > 0 {
        info!("seeded {seeded} rooms");
    }
    let orphans = ctx.report_orphans().await?;
    if orphans > 0 {
        tracing::warn!("{orphans} reservations have no room restriction");
    }

    let reaper = tokio::spawn(run_session_reaper(ctx.sessions.clone(), Duration::from_secs(60)));

    let addr = ctx.config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roomstay listening on {addr}");
    info!("  data_dir: {}", ctx.config.data_dir.display());
    info!("  store_timeout: {}ms", ctx.config.store_timeout.as_millis());
    info!("  mail_queue_capacity: {}", ctx.config.mail_queue_capacity);
    info!(
        "  metrics: {}",
        ctx.config
            .metrics_addr()
            .map_or("disabled".to_string(), |a| format!("http://{a}/metrics"))
    );

    // Stop accepting on SIGTERM/ctrl-c, finish in-flight requests.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    roomstay::http::serve(ctx.clone(), listener, shutdown).await?;
    reaper.abort();

    // The workflow holds the last mailer; dropping the context closes the
    // queue so the worker drains what is left and exits.
    drop(ctx);
    info!("draining mail queue...");
    if tokio::time::timeout(Duration::from_secs(10), mail_worker).await.is_err() {
        tracing::warn!("mail drain timeout, undelivered messages dropped");
    }

    info!("roomstay stopped");
    Ok(())
}

use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::wal::Wal;

pub(super) struct JournalEntry {
    pub event: Event,
    pub response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first entry arrives.
/// 2. Drain every entry that is already queued (the batch window).
/// 3. One `flush_sync` for the whole batch.
/// 4. Answer every sender with the batch result.
pub(super) async fn journal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<JournalEntry>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            tracing::error!(path = %wal.path().display(), "WAL flush failed: {e}");
        }
        for entry in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = entry.response.send(r);
        }
    }
    tracing::debug!("journal writer stopped after {} appends", wal.appends());
}

fn flush_batch(wal: &mut Wal, batch: &[JournalEntry]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for entry in batch {
        if let Err(e) = wal.append_buffered(&entry.event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

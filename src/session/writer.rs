//! Blocking store writer.
//!
//! Flush I/O (including `fsync`) runs on a `spawn_blocking` thread fed through
//! a bounded queue, so a slow disk applies backpressure to the decode loop
//! instead of stalling the async runtime. Batches are appended in queue order.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::AppResult;
use crate::protocol::Sample;
use crate::storage::{StoreStats, TimeSeriesStore};

/// What the writer thread reports once its queue closes.
#[derive(Debug)]
pub(crate) struct WriterOutcome {
    pub stats: StoreStats,
    pub result: AppResult<()>,
}

/// Move `store` onto a blocking thread and return its input queue.
///
/// Dropping the sender makes the writer flush, close the store and finish.
/// After a failed append the writer closes its queue, so further sends fail.
pub(crate) fn spawn_store_writer(
    store: TimeSeriesStore,
    capacity: usize,
) -> (mpsc::Sender<Vec<Sample>>, JoinHandle<WriterOutcome>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || run_writer(store, rx));
    (tx, handle)
}

fn run_writer(mut store: TimeSeriesStore, mut rx: mpsc::Receiver<Vec<Sample>>) -> WriterOutcome {
    let mut result = Ok(());
    while let Some(batch) = rx.blocking_recv() {
        if let Err(err) = store.append(&batch) {
            result = Err(err);
            break;
        }
    }
    rx.close();
    drop(rx);

    let closed = store.close();
    let stats = store.stats();
    debug!(
        rows = stats.rows_on_disk,
        flushes = stats.flush_count,
        "Store writer finished"
    );
    WriterOutcome {
        stats,
        result: result.and(closed),
    }
}

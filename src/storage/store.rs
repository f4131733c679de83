//! Append-only time-series store with batched flushes.
//!
//! # Architecture
//!
//! ```text
//! append(samples) → PendingBatch (≤ batch_rows rows)
//!                        ↓ full
//!                   backend.append_rows  (grow by exactly the batch)
//!                        ↓
//!                   backend.sync         (durable)
//!                        ↓
//!                   batch cleared
//! ```
//!
//! A flush either lands completely or fails loudly. After a failed flush the
//! store refuses further writes: the file may end in a partial record and
//! writing behind it would bury the damage. Closing still releases the file.
//!
//! # Example
//!
//! ```no_run
//! use footsole_daq::protocol::{Sample, PAYLOAD_LEN};
//! use footsole_daq::storage::TimeSeriesStore;
//! use std::path::Path;
//!
//! # fn main() -> footsole_daq::error::AppResult<()> {
//! let mut store = TimeSeriesStore::open(Path::new("right.h5"), "sensor_right")?;
//! store.append(&[Sample::new(1_000, [0u8; PAYLOAD_LEN])])?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use super::{open_backend, DatasetBackend};
use crate::error::{AppResult, DaqError};
use crate::protocol::{Sample, ROW_WIDTH};

/// Rows accepted but not yet flushed, in arrival order.
#[derive(Debug, Default)]
pub struct PendingBatch {
    values: Vec<f64>,
    rows: usize,
}

impl PendingBatch {
    fn with_capacity(rows: usize) -> Self {
        Self {
            values: Vec::with_capacity(rows * ROW_WIDTH),
            rows: 0,
        }
    }

    fn push(&mut self, sample: &Sample) {
        sample.write_row(&mut self.values);
        self.rows += 1;
    }

    fn clear(&mut self) {
        self.values.clear();
        self.rows = 0;
    }

    /// Rows waiting for the next flush.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Snapshot of store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Rows in the dataset, including rows present before this session.
    pub rows_on_disk: usize,
    /// Rows accepted but not yet flushed.
    pub pending_rows: usize,
    /// Successful flushes.
    pub flush_count: u64,
    /// Samples accepted by [`TimeSeriesStore::append`].
    pub samples_appended: u64,
}

/// One dataset open for appending.
pub struct TimeSeriesStore {
    backend: Option<Box<dyn DatasetBackend>>,
    path: PathBuf,
    dataset: String,
    batch_rows: usize,
    pending: PendingBatch,
    rows_on_disk: usize,
    flush_count: u64,
    samples_appended: u64,
    failed: bool,
}

impl TimeSeriesStore {
    /// Open `dataset` in `path` with a batch of one row (every sample is
    /// flushed immediately).
    pub fn open(path: &Path, dataset: &str) -> AppResult<Self> {
        Self::open_with(path, dataset, 1)
    }

    /// Open `dataset` in `path`, flushing every `batch_rows` samples.
    pub fn open_with(path: &Path, dataset: &str, batch_rows: usize) -> AppResult<Self> {
        let batch_rows = Self::check_batch_rows(batch_rows)?;
        let backend = open_backend(path, dataset, ROW_WIDTH, batch_rows)?;
        Self::from_backend(backend, path, dataset, batch_rows)
    }

    /// Wrap an already open backend.
    pub fn from_backend(
        backend: Box<dyn DatasetBackend>,
        path: &Path,
        dataset: &str,
        batch_rows: usize,
    ) -> AppResult<Self> {
        let batch_rows = Self::check_batch_rows(batch_rows)?;
        if backend.columns() != ROW_WIDTH {
            return Err(DaqError::ColumnCountMismatch {
                dataset: dataset.to_owned(),
                expected: ROW_WIDTH,
                found: backend.columns(),
            });
        }
        debug!(
            path = %path.display(),
            dataset,
            existing_rows = backend.rows(),
            batch_rows,
            "Opened time-series store"
        );
        let rows_on_disk = backend.rows();
        Ok(Self {
            backend: Some(backend),
            path: path.to_path_buf(),
            dataset: dataset.to_owned(),
            batch_rows,
            pending: PendingBatch::with_capacity(batch_rows),
            rows_on_disk,
            flush_count: 0,
            samples_appended: 0,
            failed: false,
        })
    }

    fn check_batch_rows(batch_rows: usize) -> AppResult<usize> {
        if batch_rows == 0 {
            return Err(DaqError::Configuration(
                "batch_rows must be at least 1".into(),
            ));
        }
        Ok(batch_rows)
    }

    /// Queue samples, flushing each time the batch fills.
    pub fn append(&mut self, samples: &[Sample]) -> AppResult<()> {
        self.ensure_writable("append")?;
        for sample in samples {
            self.pending.push(sample);
            self.samples_appended += 1;
            if self.pending.rows() >= self.batch_rows {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Write the pending batch and make it durable.
    ///
    /// The batch is cleared only once both steps succeed. Any failure is
    /// returned as-is and leaves the store refusing further writes.
    pub fn flush(&mut self) -> AppResult<()> {
        self.ensure_writable("flush")?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = self.pending.rows();
        let Some(backend) = self.backend.as_mut() else {
            return Err(closed_error("flush", &self.path));
        };

        let result = backend
            .append_rows(rows, &self.pending.values)
            .and_then(|()| backend.sync());
        if let Err(err) = result {
            self.failed = true;
            error!(
                path = %self.path.display(),
                dataset = %self.dataset,
                rows,
                error = %err,
                "Flush failed"
            );
            return Err(err);
        }

        self.rows_on_disk = backend.rows();
        self.pending.clear();
        self.flush_count += 1;
        Ok(())
    }

    /// Flush what is pending, then release the file. Idempotent.
    pub fn close(&mut self) -> AppResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        let flushed = if self.failed {
            if !self.pending.is_empty() {
                error!(
                    dataset = %self.dataset,
                    rows = self.pending.rows(),
                    "Discarding rows after failed flush"
                );
            }
            Ok(())
        } else {
            self.flush()
        };

        let closed = match self.backend.take() {
            Some(mut backend) => backend.close(),
            None => Ok(()),
        };
        debug!(
            dataset = %self.dataset,
            rows = self.rows_on_disk(),
            flushes = self.flush_count,
            "Closed time-series store"
        );
        flushed.and(closed)
    }

    fn ensure_writable(&self, operation: &'static str) -> AppResult<()> {
        if self.backend.is_none() {
            return Err(closed_error(operation, &self.path));
        }
        if self.failed {
            return Err(DaqError::store_io(
                operation,
                &self.path,
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "store is unusable after a failed flush",
                ),
            ));
        }
        Ok(())
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dataset name inside the file.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Rows durably in the dataset, including rows from earlier sessions.
    pub fn rows_on_disk(&self) -> usize {
        self.rows_on_disk
    }

    /// Rows waiting for the next flush.
    pub fn pending_rows(&self) -> usize {
        self.pending.rows()
    }

    /// Successful flushes so far.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            rows_on_disk: self.rows_on_disk(),
            pending_rows: self.pending_rows(),
            flush_count: self.flush_count,
            samples_appended: self.samples_appended,
        }
    }
}

fn closed_error(operation: &'static str, path: &Path) -> DaqError {
    DaqError::store_io(
        operation,
        path,
        std::io::Error::new(std::io::ErrorKind::Other, "store already closed"),
    )
}

impl Drop for TimeSeriesStore {
    fn drop(&mut self) {
        if self.backend.is_some() {
            warn!(dataset = %self.dataset, "Store dropped without close; closing now");
            if let Err(err) = self.close() {
                error!(dataset = %self.dataset, error = %err, "Close on drop failed");
            }
        }
    }
}

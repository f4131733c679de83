//! Persistence for decoded samples.
//!
//! A session writes one growable 2-D `f64` dataset (209 columns) into an HDF5
//! file through a [`TimeSeriesStore`], which batches rows and hands them to a
//! [`DatasetBackend`]. The HDF5 backend lives behind the `storage_hdf5`
//! feature, enabled by default; without it every open fails with
//! [`DaqError::FeatureNotEnabled`].
//!
//! Read access for downstream tools goes through [`read_datasets`].

use std::path::Path;

use crate::error::AppResult;
#[cfg(not(feature = "storage_hdf5"))]
use crate::error::DaqError;

#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod store;

#[cfg(feature = "storage_hdf5")]
pub use hdf5::Hdf5Backend;
pub use store::{StoreStats, TimeSeriesStore};

/// Extension of session files, without the dot.
pub const FILE_EXTENSION: &str = "h5";

/// A growable 2-D dataset inside an open file.
///
/// Implementations are driven from a single blocking thread; no method is
/// called after [`close`](Self::close) succeeds.
pub trait DatasetBackend: Send {
    /// Rows currently persisted (including rows not yet synced).
    fn rows(&self) -> usize;

    /// Fixed row width.
    fn columns(&self) -> usize;

    /// Grow the dataset by `rows` and write `data` (row-major,
    /// `rows * columns` values) starting at the previous row count.
    fn append_rows(&mut self, rows: usize, data: &[f64]) -> AppResult<()>;

    /// Make every appended row durable.
    fn sync(&mut self) -> AppResult<()>;

    /// Sync and release the file.
    fn close(&mut self) -> AppResult<()>;
}

/// Rows of one dataset, copied out of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSnapshot {
    name: String,
    columns: usize,
    values: Vec<f64>,
}

impl DatasetSnapshot {
    /// Build a snapshot from row-major values.
    pub fn new(name: impl Into<String>, columns: usize, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            columns,
            values,
        }
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Row count.
    pub fn rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.values.len() / self.columns
        }
    }

    /// Row width.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.columns)
    }

    /// Row `index`, if present.
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.columns)?;
        self.values.get(start..start + self.columns)
    }

    /// Rows in file order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.columns.max(1))
    }

    /// All values, row-major.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Create or reopen `dataset` in the HDF5 file at `path`.
#[cfg(feature = "storage_hdf5")]
pub fn open_backend(
    path: &Path,
    dataset: &str,
    columns: usize,
    chunk_rows: usize,
) -> AppResult<Box<dyn DatasetBackend>> {
    Ok(Box::new(Hdf5Backend::open(
        path, dataset, columns, chunk_rows,
    )?))
}

/// Create or reopen `dataset` in the HDF5 file at `path`.
#[cfg(not(feature = "storage_hdf5"))]
pub fn open_backend(
    _path: &Path,
    _dataset: &str,
    _columns: usize,
    _chunk_rows: usize,
) -> AppResult<Box<dyn DatasetBackend>> {
    Err(DaqError::FeatureNotEnabled("storage_hdf5".into()))
}

/// Read every dataset in a finished session file.
#[cfg(feature = "storage_hdf5")]
pub fn read_datasets(path: &Path) -> AppResult<Vec<DatasetSnapshot>> {
    hdf5::read_datasets(path)
}

/// Read every dataset in a finished session file.
#[cfg(not(feature = "storage_hdf5"))]
pub fn read_datasets(_path: &Path) -> AppResult<Vec<DatasetSnapshot>> {
    Err(DaqError::FeatureNotEnabled("storage_hdf5".into()))
}

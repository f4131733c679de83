//! HDF5 backend (`storage_hdf5` feature).
//!
//! Produces the layout the insole's Python analysis scripts expect: one
//! chunked, resizable `f64` dataset of shape `(N, 209)` per side, at the file
//! root. All calls are blocking; the store writer runs them on a
//! `spawn_blocking` thread.

use std::path::{Path, PathBuf};

use hdf5::{Dataset, File};
use ndarray::{s, ArrayView2};
use tracing::debug;

use super::{DatasetBackend, DatasetSnapshot};
use crate::error::{AppResult, DaqError};

fn hdf5_io(operation: &'static str, path: &Path, err: hdf5::Error) -> DaqError {
    DaqError::store_io(
        operation,
        path,
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    )
}

fn closed(operation: &'static str, path: &Path) -> DaqError {
    DaqError::store_io(
        operation,
        path,
        std::io::Error::new(std::io::ErrorKind::Other, "file already closed"),
    )
}

/// Writer for one dataset of an HDF5 file.
pub struct Hdf5Backend {
    path: PathBuf,
    file: Option<File>,
    dataset: Option<Dataset>,
    name: String,
    columns: usize,
    rows: usize,
}

impl Hdf5Backend {
    /// Create or reopen `path` and attach to the root dataset `name`.
    pub fn open(path: &Path, name: &str, columns: usize, chunk_rows: usize) -> AppResult<Self> {
        let file = if path.exists() {
            File::open_rw(path).map_err(|e| hdf5_io("open", path, e))?
        } else {
            File::create(path).map_err(|e| hdf5_io("create", path, e))?
        };

        let dataset = match file.dataset(name) {
            Ok(dataset) => {
                let shape = dataset.shape();
                let found = if shape.len() == 2 { shape[1] } else { 0 };
                if found != columns {
                    return Err(DaqError::ColumnCountMismatch {
                        dataset: name.to_owned(),
                        expected: columns,
                        found,
                    });
                }
                debug!(dataset = name, rows = shape[0], "Reopened HDF5 dataset");
                dataset
            }
            Err(_) => file
                .new_dataset::<f64>()
                .chunk((chunk_rows.max(1), columns))
                .shape((0.., columns))
                .create(name)
                .map_err(|e| hdf5_io("create dataset", path, e))?,
        };

        let rows = dataset.shape().first().copied().unwrap_or(0);
        file.flush().map_err(|e| hdf5_io("sync", path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            dataset: Some(dataset),
            name: name.to_owned(),
            columns,
            rows,
        })
    }
}

impl DatasetBackend for Hdf5Backend {
    fn rows(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.columns
    }

    fn append_rows(&mut self, rows: usize, data: &[f64]) -> AppResult<()> {
        let Some(dataset) = self.dataset.as_ref() else {
            return Err(closed("write", &self.path));
        };
        if rows == 0 {
            return Ok(());
        }
        let block = ArrayView2::from_shape((rows, self.columns), data).map_err(|_| {
            DaqError::ColumnCountMismatch {
                dataset: self.name.clone(),
                expected: self.columns,
                found: data.len() / rows,
            }
        })?;

        let start = self.rows;
        let end = start + rows;
        dataset
            .resize((end, self.columns))
            .map_err(|e| hdf5_io("grow", &self.path, e))?;
        dataset
            .write_slice(block, s![start..end, ..])
            .map_err(|e| hdf5_io("write", &self.path, e))?;
        self.rows = end;
        Ok(())
    }

    fn sync(&mut self) -> AppResult<()> {
        match &self.file {
            Some(file) => file.flush().map_err(|e| hdf5_io("sync", &self.path, e)),
            None => Err(closed("sync", &self.path)),
        }
    }

    fn close(&mut self) -> AppResult<()> {
        self.dataset = None;
        match self.file.take() {
            Some(file) => {
                file.flush().map_err(|e| hdf5_io("close", &self.path, e))?;
                file.close().map_err(|e| hdf5_io("close", &self.path, e))
            }
            None => Ok(()),
        }
    }
}

/// Read every 2-D `f64` dataset at the root of an HDF5 file.
pub fn read_datasets(path: &Path) -> AppResult<Vec<DatasetSnapshot>> {
    let file = File::open(path).map_err(|e| hdf5_io("open", path, e))?;
    let datasets = file.datasets().map_err(|e| hdf5_io("list", path, e))?;

    let mut snapshots = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let name = dataset.name().trim_start_matches('/').to_owned();
        let data = dataset
            .read_2d::<f64>()
            .map_err(|e| hdf5_io("read", path, e))?;
        let columns = data.ncols();
        let values = data.iter().copied().collect();
        snapshots.push(DatasetSnapshot::new(name, columns, values));
    }
    Ok(snapshots)
}

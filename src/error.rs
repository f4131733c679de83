//! Crate-wide error type.
//!
//! Frame-level problems never show up here: they are [`FrameError`]s that the
//! assembler recovers from by resynchronizing and only reports as diagnostics.
//! `DaqError` covers everything that can end a session or stop the CLI.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: the configuration could not be
//!   extracted, or extracted but failed validation.
//! - **`StoreIo`**: a store operation (create, grow, write, sync, close...)
//!   failed at the filesystem or HDF5 level. Fatal; names the operation.
//! - **`ColumnCountMismatch`**: an existing dataset has a different width.
//! - **`Transport`** / **`TransportDisconnected`**: the link could not be
//!   subscribed, or went away mid-session.
//! - **`WriterStopped`**: the blocking store writer exited unexpectedly.
//! - **`FeatureNotEnabled`**: functionality compiled out via Cargo features.
//!
//! [`FrameError`]: crate::protocol::FrameError

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Store I/O error during {operation} on {}: {source}", path.display())]
    StoreIo {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset '{dataset}' has {found} columns, expected {expected}")]
    ColumnCountMismatch {
        dataset: String,
        expected: usize,
        found: usize,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("Store writer stopped before the session finished")]
    WriterStopped,

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// Build a [`DaqError::StoreIo`] for `operation` on `path`.
    pub fn store_io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        DaqError::StoreIo {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_io_names_operation_and_path() {
        let err = DaqError::store_io(
            "sync",
            "/data/right.h5",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        let msg = err.to_string();
        assert!(msg.contains("during sync"), "{msg}");
        assert!(msg.contains("/data/right.h5"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }

    #[test]
    fn column_mismatch_message() {
        let err = DaqError::ColumnCountMismatch {
            dataset: "sensor_left".into(),
            expected: 209,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "Dataset 'sensor_left' has 3 columns, expected 209"
        );
    }
}

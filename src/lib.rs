//! # FootSole DAQ Core Library
//!
//! Receives the byte stream of a FootSole pressure insole, cuts it into
//! validated 216-byte frames, timestamps each frame as a sample of 208
//! sensor bytes, and appends the samples to a growable two-dimensional
//! dataset that survives interruption.
//!
//! The `footsole-logger` binary (`main.rs`) is a thin shell over this
//! library; tests drive the same code through a mock transport.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Frame layout and validation, the `StreamAssembler` that
//!   resynchronizes on corrupt input, and the `Sample` row type.
//! - **`storage`**: The append-only `TimeSeriesStore` with batched,
//!   flush-on-batch writes over a `DatasetBackend` (HDF5, behind the default
//!   `storage_hdf5` feature).
//! - **`transport`**: The `Transport` trait and its implementations: a
//!   scriptable mock device and a reader over captures or a serial port.
//! - **`session`**: The `SessionController` wiring transport, assembler and
//!   store together, with its state machine and shutdown signal.
//! - **`config`**: Layered configuration (defaults, TOML file, environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide `DaqError`.

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transport;

//! FootSole wire protocol.
//!
//! - [`frame`]: 216-byte frame layout, validation and construction
//! - [`assembler`]: turns an arbitrarily chunked byte stream into samples
//! - [`sample`]: decoded samples and their timestamp source

pub mod assembler;
pub mod frame;
pub mod sample;

pub use assembler::{StreamAssembler, SyncEvent};
pub use frame::{
    checksum16, encode_frame, validate, validate_prefix, Frame, FrameBuilder, FrameError,
    FRAME_LEN, PAYLOAD_LEN,
};
pub use sample::{Clock, Sample, StepClock, SystemClock, ROW_WIDTH};

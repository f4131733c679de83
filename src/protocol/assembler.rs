//! Frame-synchronizing stream assembler.
//!
//! The wireless stack hands us notifications whose boundaries have nothing to
//! do with frame boundaries: a frame may be split across several chunks, one
//! chunk may carry several frames, and bytes may be lost or corrupted. The
//! assembler treats everything it is given as one continuous byte stream.
//!
//! # Resynchronization
//!
//! ```text
//! buffer: [g g g | 5A A5 .. frame .. ck ck | 5A A5 .. ]
//!          ^ validate fails -> drop ONE byte, retry
//!                ^ validate ok -> emit Sample, drop 216 bytes
//! ```
//!
//! Dropping a single byte on failure (rather than a whole frame) bounds the
//! loss to exactly the garbage in front of the next good frame. Each retry
//! costs one O(216) validation, which only matters during corruption bursts.
//!
//! The assembler never logs. Anything worth reporting is queued as a
//! [`SyncEvent`] and drained by the session controller.

use std::fmt;

use bytes::{Buf, BytesMut};

use super::frame::{self, FrameError, FRAME_LEN};
use super::sample::{Clock, Sample, SystemClock};

/// Bytes of buffer head captured when a resync run starts.
const PREVIEW_LEN: usize = 32;

/// Recoverable synchronization diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A contiguous run of bytes was discarded before the buffer head
    /// validated again (or the buffer ran short).
    Resync {
        /// Number of bytes dropped in this run.
        discarded: usize,
        /// Validation failure that started the run.
        cause: FrameError,
        /// Hex of the first bytes of the buffer when the run started.
        head_hex: String,
    },
    /// The stream ended with a partial frame that can never complete.
    TrailingUnconsumedBytes {
        /// Number of bytes discarded.
        len: usize,
    },
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::Resync {
                discarded, cause, ..
            } => write!(f, "skipped {discarded} bytes to resync ({cause})"),
            SyncEvent::TrailingUnconsumedBytes { len } => {
                write!(f, "discarded {len} trailing bytes at end of stream")
            }
        }
    }
}

#[derive(Debug)]
struct ResyncRun {
    discarded: usize,
    cause: FrameError,
    head_hex: String,
}

/// Owned byte queue that turns an arbitrary chunked stream into samples.
///
/// One assembler belongs to one session; calls to [`ingest`](Self::ingest)
/// must be serialized in arrival order.
///
/// # Example
///
/// ```
/// use footsole_daq::protocol::{FrameBuilder, StreamAssembler};
///
/// let frame = FrameBuilder::new().build();
/// let mut assembler = StreamAssembler::new();
///
/// assert!(assembler.ingest(&frame[..100]).is_empty());
/// let samples = assembler.ingest(&frame[100..]);
/// assert_eq!(samples.len(), 1);
/// assert_eq!(assembler.bytes_discarded(), 0);
/// ```
pub struct StreamAssembler<C: Clock = SystemClock> {
    buffer: BytesMut,
    clock: C,
    bytes_received: u64,
    bytes_discarded: u64,
    frames_decoded: u64,
    events: Vec<SyncEvent>,
}

impl Default for StreamAssembler<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler<SystemClock> {
    /// Assembler stamping samples with wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl<C: Clock> StreamAssembler<C> {
    /// Assembler stamping samples from the given clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_LEN * 4),
            clock,
            bytes_received: 0,
            bytes_discarded: 0,
            frames_decoded: 0,
            events: Vec::new(),
        }
    }

    /// Append `chunk` to the stream and extract every frame now available.
    ///
    /// Samples are returned in stream order. Bytes that cannot start a valid
    /// frame are discarded one at a time; fewer than 216 leftover bytes stay
    /// buffered for the next call.
    pub fn ingest(&mut self, chunk: &[u8]) -> Vec<Sample> {
        self.bytes_received += chunk.len() as u64;
        self.buffer.extend_from_slice(chunk);

        let mut samples = Vec::with_capacity(self.buffer.len() / FRAME_LEN);
        let mut run: Option<ResyncRun> = None;

        while self.buffer.len() >= FRAME_LEN {
            match frame::validate_prefix(&self.buffer) {
                Ok(valid) => {
                    let readings = *valid.payload();
                    if let Some(done) = run.take() {
                        self.close_run(done);
                    }
                    let timestamp_ns = self.clock.now_ns();
                    samples.push(Sample::new(timestamp_ns, readings));
                    self.buffer.advance(FRAME_LEN);
                    self.frames_decoded += 1;
                }
                Err(cause) => {
                    match run.as_mut() {
                        Some(active) => active.discarded += 1,
                        None => {
                            let preview = self.buffer.len().min(PREVIEW_LEN);
                            run = Some(ResyncRun {
                                discarded: 1,
                                cause,
                                head_hex: hex::encode(&self.buffer[..preview]),
                            });
                        }
                    }
                    self.buffer.advance(1);
                    self.bytes_discarded += 1;
                }
            }
        }

        if let Some(done) = run {
            self.close_run(done);
        }
        samples
    }

    /// End of stream: drop any partial frame left in the buffer.
    ///
    /// Returns the number of bytes discarded, or `None` when the stream ended
    /// exactly on a frame boundary.
    pub fn finish(&mut self) -> Option<usize> {
        let len = self.buffer.len();
        if len == 0 {
            return None;
        }
        self.buffer.clear();
        self.events.push(SyncEvent::TrailingUnconsumedBytes { len });
        Some(len)
    }

    /// Take the diagnostics accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Total bytes dropped while resynchronizing (excludes trailing bytes).
    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }

    /// Total bytes handed to [`ingest`](Self::ingest).
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Frames successfully decoded.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Bytes currently waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn close_run(&mut self, run: ResyncRun) {
        self.events.push(SyncEvent::Resync {
            discarded: run.discarded,
            cause: run.cause,
            head_hex: run.head_hex,
        });
    }
}

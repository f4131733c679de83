//! FootSole wire frame: layout, validation and construction.
//!
//! Every notification from the insole carries some slice of a continuous byte
//! stream made of fixed 216-byte frames. A frame is self-describing only in the
//! sense that it carries its own length and a 16-bit additive checksum, which
//! is what the resynchronizing assembler relies on to find frame boundaries.
//!
//! # Frame Layout
//! ```text
//! offset  size  field        constraint
//!      0     2  header       u16 LE, 0x5AA5 or 0x015A
//!      2     1  frame_type   any (not interpreted)
//!      3     2  length       u16 LE, must be 216
//!      5     1  packet_type  any (not interpreted)
//!      6   208  payload      raw sensor counts, one byte per cell
//!    214     2  checksum     u16 LE, sum of bytes[0..214] mod 65536
//! ```
//!
//! # Example
//!
//! ```
//! use footsole_daq::protocol::frame::{self, FrameBuilder, PAYLOAD_LEN};
//!
//! let bytes = FrameBuilder::new().payload(&[7u8; PAYLOAD_LEN]).build();
//! let frame = frame::validate(&bytes).unwrap();
//! assert_eq!(frame.payload()[0], 7);
//! ```

use thiserror::Error;

/// Total size of one frame on the wire.
pub const FRAME_LEN: usize = 216;

/// Number of sensor cells carried by one frame.
pub const PAYLOAD_LEN: usize = 208;

/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 6;

/// Offset of the trailing checksum; also the number of checksummed bytes.
pub const CHECKSUM_OFFSET: usize = FRAME_LEN - 2;

/// Primary frame header emitted by current firmware.
pub const HEADER_PRIMARY: u16 = 0x5AA5;

/// Alternate header emitted by older firmware builds.
pub const HEADER_ALTERNATE: u16 = 0x015A;

/// Headers accepted by [`validate`].
pub const ACCEPTED_HEADERS: [u16; 2] = [HEADER_PRIMARY, HEADER_ALTERNATE];

/// Reasons a byte window is not a frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The first two bytes are not an accepted sentinel.
    #[error("bad header 0x{found:04X}")]
    BadHeader {
        /// Header value read from the window.
        found: u16,
    },

    /// The declared length is not the fixed frame size.
    #[error("bad length {found} (expected 216)")]
    BadLength {
        /// Length field read from the window.
        found: u16,
    },

    /// The trailing checksum does not match the recomputed sum.
    #[error("bad checksum: frame carries 0x{received:04X}, computed 0x{computed:04X}")]
    BadChecksum {
        /// Checksum field read from the window.
        received: u16,
        /// Sum of bytes[0..214] mod 65536.
        computed: u16,
    },

    /// Fewer than [`FRAME_LEN`] bytes are available. Not a corruption, the
    /// caller should wait for more data.
    #[error("short buffer: {available} of 216 bytes available")]
    ShortBuffer {
        /// Bytes available at the time of the check.
        available: usize,
    },
}

impl FrameError {
    /// Short label used in diagnostics and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::BadHeader { .. } => "bad_header",
            FrameError::BadLength { .. } => "bad_length",
            FrameError::BadChecksum { .. } => "bad_checksum",
            FrameError::ShortBuffer { .. } => "short_buffer",
        }
    }
}

/// A validated frame borrowed from the window it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    header: u16,
    frame_type: u8,
    length: u16,
    packet_type: u8,
    checksum: u16,
    payload: &'a [u8; PAYLOAD_LEN],
}

impl<'a> Frame<'a> {
    /// Header sentinel (one of [`ACCEPTED_HEADERS`]).
    pub fn header(&self) -> u16 {
        self.header
    }

    /// Frame type byte, carried through but not interpreted.
    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Declared length, always [`FRAME_LEN`] for a valid frame.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Packet type byte, carried through but not interpreted.
    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    /// Checksum carried by the frame.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// The 208 raw sensor readings in wire order.
    pub fn payload(&self) -> &'a [u8; PAYLOAD_LEN] {
        self.payload
    }
}

/// Unsigned 16-bit additive checksum (sum of all bytes mod 65536).
pub fn checksum16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

fn read_u16_le(window: &[u8; FRAME_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([window[offset], window[offset + 1]])
}

/// Validate a 216-byte window.
///
/// Checks run in wire order and stop at the first failure: header, declared
/// length, checksum. Nothing is allocated and nothing is logged.
pub fn validate(window: &[u8; FRAME_LEN]) -> Result<Frame<'_>, FrameError> {
    let header = read_u16_le(window, 0);
    if !ACCEPTED_HEADERS.contains(&header) {
        return Err(FrameError::BadHeader { found: header });
    }

    let length = read_u16_le(window, 3);
    if usize::from(length) != FRAME_LEN {
        return Err(FrameError::BadLength { found: length });
    }

    let received = read_u16_le(window, CHECKSUM_OFFSET);
    let computed = checksum16(&window[..CHECKSUM_OFFSET]);
    if received != computed {
        return Err(FrameError::BadChecksum { received, computed });
    }

    let payload: &[u8; PAYLOAD_LEN] = window[PAYLOAD_OFFSET..CHECKSUM_OFFSET]
        .try_into()
        .map_err(|_| FrameError::ShortBuffer {
            available: window.len(),
        })?;

    Ok(Frame {
        header,
        frame_type: window[2],
        length,
        packet_type: window[5],
        checksum: received,
        payload,
    })
}

/// Validate the first [`FRAME_LEN`] bytes of an arbitrary slice.
///
/// Returns [`FrameError::ShortBuffer`] when the slice is too short to hold a
/// frame; extra trailing bytes are ignored.
pub fn validate_prefix(buf: &[u8]) -> Result<Frame<'_>, FrameError> {
    let window: &[u8; FRAME_LEN] = buf
        .get(..FRAME_LEN)
        .and_then(|head| head.try_into().ok())
        .ok_or(FrameError::ShortBuffer {
            available: buf.len(),
        })?;
    validate(window)
}

/// Builder for well-formed frames.
///
/// Used by the mock device, tests and benchmarks. Header and length default to
/// the values current firmware emits; the checksum is always computed.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    header: u16,
    frame_type: u8,
    length: u16,
    packet_type: u8,
    payload: [u8; PAYLOAD_LEN],
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    /// New builder with the primary header and a zeroed payload.
    pub fn new() -> Self {
        Self {
            header: HEADER_PRIMARY,
            frame_type: 0x01,
            length: FRAME_LEN as u16,
            packet_type: 0x01,
            payload: [0u8; PAYLOAD_LEN],
        }
    }

    /// Override the header sentinel.
    pub fn header(mut self, header: u16) -> Self {
        self.header = header;
        self
    }

    /// Override the frame type byte.
    pub fn frame_type(mut self, frame_type: u8) -> Self {
        self.frame_type = frame_type;
        self
    }

    /// Override the declared length (produces an invalid frame unless 216).
    pub fn length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    /// Override the packet type byte.
    pub fn packet_type(mut self, packet_type: u8) -> Self {
        self.packet_type = packet_type;
        self
    }

    /// Set the sensor payload.
    pub fn payload(mut self, payload: &[u8; PAYLOAD_LEN]) -> Self {
        self.payload = *payload;
        self
    }

    /// Encode the frame, appending the computed checksum.
    pub fn build(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..2].copy_from_slice(&self.header.to_le_bytes());
        out[2] = self.frame_type;
        out[3..5].copy_from_slice(&self.length.to_le_bytes());
        out[5] = self.packet_type;
        out[PAYLOAD_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&self.payload);
        let checksum = checksum16(&out[..CHECKSUM_OFFSET]);
        out[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        out
    }
}

/// Encode a frame with the given header fields and payload.
pub fn encode_frame(
    header: u16,
    frame_type: u8,
    packet_type: u8,
    payload: &[u8; PAYLOAD_LEN],
) -> [u8; FRAME_LEN] {
    FrameBuilder::new()
        .header(header)
        .frame_type(frame_type)
        .packet_type(packet_type)
        .payload(payload)
        .build()
}

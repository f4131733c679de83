//! Decoded samples and the clock that timestamps them.
//!
//! The wire frame carries no capture time. A sample is stamped with host
//! wall-clock time when its frame is decoded, so timestamps include the
//! reception jitter of the wireless link.

use std::time::{SystemTime, UNIX_EPOCH};

use super::frame::PAYLOAD_LEN;

/// Number of columns a sample occupies in a dataset (timestamp + readings).
pub const ROW_WIDTH: usize = 1 + PAYLOAD_LEN;

/// One decoded, validated frame: reception timestamp plus 208 readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    timestamp_ns: u64,
    readings: [u8; PAYLOAD_LEN],
}

impl Sample {
    /// Create a sample from a timestamp and a frame payload.
    pub fn new(timestamp_ns: u64, readings: [u8; PAYLOAD_LEN]) -> Self {
        Self {
            timestamp_ns,
            readings,
        }
    }

    /// Reception time in nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Raw sensor counts in frame payload order.
    pub fn readings(&self) -> &[u8; PAYLOAD_LEN] {
        &self.readings
    }

    /// Append this sample as one dataset row: column 0 is the timestamp,
    /// columns 1..=208 the readings.
    ///
    /// Column 0 is `f64`, which holds integers exactly only up to 2^53.
    /// Present-day nanosecond timestamps are above that and round to a
    /// multiple of 256 ns, so adjacent rows can store the same timestamp
    /// even though [`SystemClock`] strictly increases. Row order is the
    /// arrival order; use it rather than column 0 to sequence samples.
    pub fn write_row(&self, row: &mut Vec<f64>) {
        row.reserve(ROW_WIDTH);
        row.push(self.timestamp_ns as f64);
        row.extend(self.readings.iter().map(|&v| f64::from(v)));
    }

    /// This sample as a standalone dataset row.
    pub fn to_row(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(ROW_WIDTH);
        self.write_row(&mut row);
        row
    }
}

/// Source of sample timestamps.
pub trait Clock: Send {
    /// Current time in nanoseconds since the Unix epoch.
    fn now_ns(&mut self) -> u64;
}

/// Wall-clock time, clamped so successive readings strictly increase.
///
/// Several frames decoded from one notification are stamped within the same
/// microsecond on some platforms; the clamp keeps dataset rows ordered by
/// timestamp even then, and across backwards NTP steps.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_ns: u64,
}

impl SystemClock {
    /// New clock with no history.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_ns(&mut self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.last_ns = wall.max(self.last_ns.saturating_add(1));
        self.last_ns
    }
}

/// Deterministic clock advancing by a fixed step on every reading.
#[derive(Debug, Clone)]
pub struct StepClock {
    next_ns: u64,
    step_ns: u64,
}

impl StepClock {
    /// Clock whose first reading is `start_ns`.
    pub fn new(start_ns: u64, step_ns: u64) -> Self {
        Self {
            next_ns: start_ns,
            step_ns,
        }
    }
}

impl Clock for StepClock {
    fn now_ns(&mut self) -> u64 {
        let now = self.next_ns;
        self.next_ns = self.next_ns.saturating_add(self.step_ns);
        now
    }
}

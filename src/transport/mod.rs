//! Byte-stream transports feeding a session.
//!
//! A transport delivers raw notification payloads from the insole. It knows
//! nothing about frames: chunk boundaries are whatever the link produced.
//! Discovery, pairing and reconnection are out of scope; a transport either
//! subscribes or fails, and reports a lost link exactly once.
//!
//! - [`mock`]: in-process device scripted by tests
//! - [`stream`]: any `AsyncRead` (capture replays, USB serial)

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::AppResult;

pub mod mock;
pub mod stream;

pub use mock::{MockDevice, MockTransport};
pub use stream::ReaderTransport;

/// Delivered by a transport into the session's event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One notification payload, in arrival order.
    Chunk(Bytes),
    /// The link went away; no further events follow.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// The source is exhausted (replay reached end of file).
    EndOfStream,
}

/// Source of notification payloads.
///
/// `subscribe` starts delivery into `events` and returns once delivery is
/// running; `unsubscribe` stops it and waits for the delivery task to finish.
/// A full `events` queue applies backpressure to the transport.
#[async_trait]
pub trait Transport: Send {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Start pushing events for `endpoint` into `events`.
    async fn subscribe(
        &mut self,
        endpoint: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> AppResult<()>;

    /// Stop delivery. Calling it when not subscribed is a no-op.
    async fn unsubscribe(&mut self) -> AppResult<()>;
}

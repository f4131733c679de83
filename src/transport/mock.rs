//! Scriptable in-process insole.
//!
//! # Architecture
//!
//! ```text
//! MockDevice (test) ──unbounded──▶ forwarder task ──bounded──▶ session queue
//!                                      ▲
//!                  MockTransport ──────┘ subscribe / unsubscribe
//! ```
//!
//! Everything the device sends before subscription is buffered and delivered
//! once the session subscribes, in order. Dropping the device while
//! subscribed is reported as a disconnection.
//!
//! # Example
//!
//! ```rust,ignore
//! let (transport, device) = mock::new();
//! device.send_frames(&[FrameBuilder::new().build()]);
//! device.end_of_stream();
//! let report = SessionController::new(config).run(transport, signal).await?;
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Transport, TransportEvent};
use crate::error::{AppResult, DaqError};
use crate::protocol::FRAME_LEN;

#[derive(Debug)]
enum DeviceCommand {
    Chunk(Bytes),
    Disconnect(String),
    EndOfStream,
}

#[derive(Debug, Default)]
struct Shared {
    subscribe_failure: Option<String>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
}

/// Session-facing side of the mock.
#[derive(Debug)]
pub struct MockTransport {
    commands: Option<UnboundedReceiver<DeviceCommand>>,
    forwarder: Option<(oneshot::Sender<()>, JoinHandle<UnboundedReceiver<DeviceCommand>>)>,
    subscribed: watch::Sender<Option<String>>,
    shared: Arc<Mutex<Shared>>,
}

/// Test-facing side of the mock.
#[derive(Debug, Clone)]
pub struct MockDevice {
    commands: UnboundedSender<DeviceCommand>,
    subscribed: watch::Receiver<Option<String>>,
    shared: Arc<Mutex<Shared>>,
}

/// Create a connected transport/device pair.
pub fn new() -> (MockTransport, MockDevice) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (subscribed_tx, subscribed_rx) = watch::channel(None);
    let shared = Arc::new(Mutex::new(Shared::default()));

    let transport = MockTransport {
        commands: Some(commands_rx),
        forwarder: None,
        subscribed: subscribed_tx,
        shared: shared.clone(),
    };
    let device = MockDevice {
        commands: commands_tx,
        subscribed: subscribed_rx,
        shared,
    };
    (transport, device)
}

async fn forward(
    mut commands: UnboundedReceiver<DeviceCommand>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> UnboundedReceiver<DeviceCommand> {
    loop {
        let command = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            command = commands.recv() => command,
        };

        let (event, last) = match command {
            Some(DeviceCommand::Chunk(bytes)) => (TransportEvent::Chunk(bytes), false),
            Some(DeviceCommand::Disconnect(reason)) => {
                (TransportEvent::Disconnected { reason }, true)
            }
            Some(DeviceCommand::EndOfStream) => (TransportEvent::EndOfStream, true),
            None => (
                TransportEvent::Disconnected {
                    reason: "mock device dropped".into(),
                },
                true,
            ),
        };

        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            sent = events.send(event) => {
                if sent.is_err() || last {
                    break;
                }
            }
        }
    }
    commands
}

#[async_trait]
impl Transport for MockTransport {
    fn describe(&self) -> String {
        "mock device".into()
    }

    async fn subscribe(
        &mut self,
        endpoint: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> AppResult<()> {
        {
            let mut shared = self
                .shared
                .lock()
                .map_err(|_| DaqError::Transport("mock state poisoned".into()))?;
            shared.subscribe_calls += 1;
            if let Some(reason) = shared.subscribe_failure.take() {
                return Err(DaqError::Transport(reason));
            }
        }
        let commands = self
            .commands
            .take()
            .ok_or_else(|| DaqError::Transport("already subscribed".into()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(forward(commands, events, shutdown_rx));
        self.forwarder = Some((shutdown_tx, handle));
        self.subscribed.send_replace(Some(endpoint.to_owned()));
        debug!(endpoint, "Mock transport subscribed");
        Ok(())
    }

    async fn unsubscribe(&mut self) -> AppResult<()> {
        if let Ok(mut shared) = self.shared.lock() {
            shared.unsubscribe_calls += 1;
        }
        if let Some((shutdown_tx, handle)) = self.forwarder.take() {
            let _ = shutdown_tx.send(());
            let commands = handle
                .await
                .map_err(|e| DaqError::Transport(format!("mock forwarder failed: {e}")))?;
            self.commands = Some(commands);
        }
        self.subscribed.send_replace(None);
        Ok(())
    }
}

impl MockDevice {
    /// Send one notification payload.
    pub fn send_chunk(&self, bytes: &[u8]) {
        let _ = self
            .commands
            .send(DeviceCommand::Chunk(Bytes::copy_from_slice(bytes)));
    }

    /// Send each frame as its own notification.
    pub fn send_frames(&self, frames: &[[u8; FRAME_LEN]]) {
        for frame in frames {
            self.send_chunk(frame);
        }
    }

    /// Report a lost link; nothing is delivered after it.
    pub fn disconnect(&self, reason: &str) {
        let _ = self.commands.send(DeviceCommand::Disconnect(reason.into()));
    }

    /// Report the end of the stream; nothing is delivered after it.
    pub fn end_of_stream(&self) {
        let _ = self.commands.send(DeviceCommand::EndOfStream);
    }

    /// Make the next `subscribe` call fail with `reason`.
    pub fn fail_next_subscribe(&self, reason: &str) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.subscribe_failure = Some(reason.into());
        }
    }

    /// Endpoint currently subscribed, if any.
    pub fn subscribed_endpoint(&self) -> Option<String> {
        self.subscribed.borrow().clone()
    }

    /// Wait until a session subscribes; returns the endpoint.
    pub async fn wait_subscribed(&mut self) -> Option<String> {
        self.subscribed
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|endpoint| endpoint.clone())
    }

    /// Number of `subscribe` calls seen, including failed ones.
    pub fn subscribe_calls(&self) -> usize {
        self.shared.lock().map_or(0, |s| s.subscribe_calls)
    }

    /// Number of `unsubscribe` calls seen.
    pub fn unsubscribe_calls(&self) -> usize {
        self.shared.lock().map_or(0, |s| s.unsubscribe_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_chunks_are_delivered_in_order() {
        let (mut transport, device) = new();
        device.send_chunk(b"abc");
        device.send_chunk(b"de");
        device.end_of_stream();

        let (tx, mut rx) = mpsc::channel(4);
        transport.subscribe("FootSole-C3", tx).await.unwrap();
        assert_eq!(device.subscribed_endpoint().as_deref(), Some("FootSole-C3"));

        assert_eq!(rx.recv().await, Some(TransportEvent::Chunk(Bytes::from_static(b"abc"))));
        assert_eq!(rx.recv().await, Some(TransportEvent::Chunk(Bytes::from_static(b"de"))));
        assert_eq!(rx.recv().await, Some(TransportEvent::EndOfStream));
        assert_eq!(rx.recv().await, None);

        transport.unsubscribe().await.unwrap();
        assert_eq!(device.subscribed_endpoint(), None);
    }

    #[tokio::test]
    async fn dropped_device_reads_as_disconnect() {
        let (mut transport, device) = new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.subscribe("x", tx).await.unwrap();
        drop(device);

        match rx.recv().await {
            Some(TransportEvent::Disconnected { reason }) => assert!(reason.contains("dropped")),
            other => panic!("unexpected {other:?}"),
        }
        transport.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported_once() {
        let (mut transport, device) = new();
        device.fail_next_subscribe("device not found");

        let (tx, _rx) = mpsc::channel(1);
        let err = transport.subscribe("x", tx.clone()).await.unwrap_err();
        assert!(matches!(err, DaqError::Transport(ref r) if r == "device not found"));

        transport.subscribe("x", tx).await.unwrap();
        assert_eq!(device.subscribe_calls(), 2);
        transport.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn resubscribe_after_unsubscribe_keeps_queued_chunks() {
        let (mut transport, device) = new();
        let (tx, mut rx) = mpsc::channel(1);
        transport.subscribe("x", tx).await.unwrap();
        transport.unsubscribe().await.unwrap();
        assert_eq!(rx.recv().await, None);

        device.send_chunk(b"late");
        let (tx, mut rx) = mpsc::channel(1);
        transport.subscribe("x", tx).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Chunk(Bytes::from_static(b"late")))
        );
        transport.unsubscribe().await.unwrap();
        assert_eq!(device.unsubscribe_calls(), 2);
    }
}

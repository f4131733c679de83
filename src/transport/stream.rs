//! Transport over any async byte source.
//!
//! Used to replay raw captures (a file holding the concatenated notification
//! payloads of an earlier session) and, with the `tokio_serial` feature, to
//! read the insole's USB serial port, which carries the same frame stream.
//!
//! Reads are cut at `read_chunk_bytes`, so chunk boundaries fall anywhere
//! inside frames, as they do over the air.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Transport, TransportEvent};
use crate::error::{AppResult, DaqError};

/// Default read size: one BLE notification on a large-MTU link.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 244;

/// [`Transport`] reading an [`AsyncRead`] until end of stream.
///
/// A reader can be subscribed once; the source is consumed.
pub struct ReaderTransport<R> {
    label: String,
    reader: Option<R>,
    read_chunk_bytes: usize,
    chunk_interval: Option<Duration>,
    task: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl<R> ReaderTransport<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Wrap `reader`, reading at most `read_chunk_bytes` per chunk.
    pub fn new(label: impl Into<String>, reader: R, read_chunk_bytes: usize) -> Self {
        Self {
            label: label.into(),
            reader: Some(reader),
            read_chunk_bytes: read_chunk_bytes.max(1),
            chunk_interval: None,
            task: None,
        }
    }

    /// Pause between chunks, to replay a capture at roughly device pace.
    pub fn with_chunk_interval(mut self, interval: Duration) -> Self {
        self.chunk_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }
}

impl ReaderTransport<tokio::fs::File> {
    /// Replay a raw capture file.
    pub async fn open_file(path: &Path, read_chunk_bytes: usize) -> AppResult<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| DaqError::Transport(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self::new(
            format!("replay {}", path.display()),
            file,
            read_chunk_bytes,
        ))
    }
}

#[cfg(feature = "tokio_serial")]
impl ReaderTransport<tokio_serial::SerialStream> {
    /// Open the insole's USB serial port (8N1, no flow control).
    pub fn open_serial(port: &str, baud_rate: u32, read_chunk_bytes: usize) -> AppResult<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| DaqError::Transport(format!("cannot open serial port {port}: {e}")))?;
        Ok(Self::new(
            format!("serial {port} @ {baud_rate}"),
            stream,
            read_chunk_bytes,
        ))
    }
}

async fn pump<R>(
    mut reader: R,
    events: mpsc::Sender<TransportEvent>,
    read_chunk_bytes: usize,
    chunk_interval: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(read_chunk_bytes);
    let mut total: u64 = 0;

    loop {
        buf.clear();
        buf.reserve(read_chunk_bytes);
        let mut limited = (&mut reader).take(read_chunk_bytes as u64);
        let read = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            read = limited.read_buf(&mut buf) => read,
        };

        let event = match read {
            Ok(0) => TransportEvent::EndOfStream,
            Ok(n) => {
                total += n as u64;
                TransportEvent::Chunk(buf.split().freeze())
            }
            Err(e) => TransportEvent::Disconnected {
                reason: format!("read failed: {e}"),
            },
        };
        let last = !matches!(event, TransportEvent::Chunk(_));
        if last {
            debug!(bytes = total, "Reader transport finished");
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            sent = events.send(event) => {
                if sent.is_err() || last {
                    return;
                }
            }
        }

        if let Some(interval) = chunk_interval {
            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[async_trait]
impl<R> Transport for ReaderTransport<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn subscribe(
        &mut self,
        endpoint: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> AppResult<()> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| DaqError::Transport(format!("{} already consumed", self.label)))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(pump(
            reader,
            events,
            self.read_chunk_bytes,
            self.chunk_interval,
            shutdown_rx,
        ));
        self.task = Some((shutdown_tx, handle));
        info!(source = %self.label, endpoint, "Streaming from reader");
        Ok(())
    }

    async fn unsubscribe(&mut self) -> AppResult<()> {
        if let Some((shutdown_tx, handle)) = self.task.take() {
            let _ = shutdown_tx.send(());
            handle
                .await
                .map_err(|e| DaqError::Transport(format!("reader task failed: {e}")))?;
        }
        Ok(())
    }
}

//! # Frame Streams
//!
//! Moves whole frames over a reliable byte stream.
//!
//! [`FrameTransport`] wraps any `AsyncRead + AsyncWrite` stream: a TCP socket
//! in production, an in-memory duplex pipe in tests. [`LazyTcpTransport`]
//! dials its address on first use.
//!
//! Each half of the stream sits behind its own async lock. A send holds the
//! write lock until the length prefix and the payload are both flushed, so
//! frames from concurrent senders never interleave.

use crate::core::frame::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout::with_timeout;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, trace};

/// Something that can exchange whole frames with a peer.
pub trait FrameIo: Send + Sync {
    /// Write one frame. Completion means the frame was handed to the OS.
    fn send_frame(&self, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next frame. A stream that ends between frames yields
    /// [`ProtocolError::ConnectionClosed`]; one that ends inside a frame
    /// yields [`ProtocolError::TruncatedFrame`].
    fn recv_frame(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Frame transport over an already connected stream.
pub struct FrameTransport<S> {
    reader: Mutex<FramedRead<ReadHalf<S>, FrameCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<S>, FrameCodec>>,
}

impl<S> std::fmt::Debug for FrameTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport").finish_non_exhaustive()
    }
}

impl<S> FrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(FramedRead::new(read_half, FrameCodec)),
            writer: Mutex::new(FramedWrite::new(write_half, FrameCodec)),
        }
    }

    /// Flush and shut down the write half. The peer sees end of stream.
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.close().await
    }
}

impl FrameTransport<DuplexStream> {
    /// Two transports joined by an in-memory pipe.
    pub fn memory_pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Self::new(a), Self::new(b))
    }
}

impl<S> FrameIo for FrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send_frame(&self, payload: Vec<u8>) -> Result<()> {
        let len = payload.len();
        let mut writer = self.writer.lock().await;
        writer.send(payload).await?;
        trace!(bytes = len, "Frame sent");
        Ok(())
    }

    async fn recv_frame(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        let frame = reader.next().await.ok_or(ProtocolError::ConnectionClosed)??;
        trace!(bytes = frame.len(), "Frame received");
        Ok(frame)
    }
}

/// TCP frame transport that connects on first use.
///
/// The first send or receive dials the address; later calls reuse the
/// connection. A failed dial leaves the transport unconnected, so the next
/// call dials again.
#[derive(Debug)]
pub struct LazyTcpTransport {
    addr: String,
    connect_timeout: Duration,
    connection: OnceCell<FrameTransport<TcpStream>>,
}

impl LazyTcpTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            connection: OnceCell::new(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Connect now if not yet connected.
    pub async fn connect(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<&FrameTransport<TcpStream>> {
        self.connection.get_or_try_init(|| self.dial()).await
    }

    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn dial(&self) -> Result<FrameTransport<TcpStream>> {
        debug!(timeout_ms = self.connect_timeout.as_millis() as u64, "Connecting");
        let stream = with_timeout(TcpStream::connect(&self.addr), self.connect_timeout)
            .await?
            .map_err(|source| ProtocolError::ConnectFailed {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        info!("Connected");
        Ok(FrameTransport::new(stream))
    }
}

impl FrameIo for LazyTcpTransport {
    async fn send_frame(&self, payload: Vec<u8>) -> Result<()> {
        self.connection().await?.send_frame(payload).await
    }

    async fn recv_frame(&self) -> Result<Vec<u8>> {
        self.connection().await?.recv_frame().await
    }
}

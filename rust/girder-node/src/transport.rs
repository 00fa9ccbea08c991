//! Framed transports.
//!
//! The distribution stream is a sequence of 4-byte big-endian
//! length-prefixed frames; a zero-length frame is a liveness TICK,
//! answered in kind by the transport itself. [`FramedTransport`] works
//! over any `AsyncRead + AsyncWrite` byte stream, so the same framing
//! serves TCP sockets and the in-memory duplex pairs the tests use.
//!
//! Authentication (handshake, cookie check) happens before a stream is
//! handed to `FramedTransport`; this layer only frames.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Enable wire-level frame logging for debugging.
/// Set GIRDER_WIRE_SPY=1 to enable.
static WIRE_SPY_ENABLED: AtomicBool = AtomicBool::new(false);
static WIRE_SPY_INIT: OnceLock<()> = OnceLock::new();

fn wire_spy_enabled() -> bool {
    WIRE_SPY_INIT.get_or_init(|| {
        if std::env::var("GIRDER_WIRE_SPY").is_ok() {
            WIRE_SPY_ENABLED.store(true, Ordering::Relaxed);
        }
    });

    WIRE_SPY_ENABLED.load(Ordering::Relaxed)
}

fn wire_spy_bytes(direction: &str, bytes: &[u8]) {
    if wire_spy_enabled() {
        eprintln!(
            "[WIRE] {direction} {} bytes: {:02x?}",
            bytes.len(),
            &bytes[..bytes.len().min(64)]
        );
    }
}

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Liveness tick (empty frame). Already acknowledged by the
    /// transport; observed as a no-op upstream.
    Tick,
    /// A distribution payload.
    Data(Vec<u8>),
}

/// Trait for transports that deliver distribution frames.
///
/// `recv_frame` returns `Ok(None)` on clean close. Both methods are the
/// connection driver's exclusive property: the driver is the only
/// reader and the only writer.
pub trait Transport: Send + 'static {
    /// Write one frame.
    fn send_frame(&mut self, payload: &[u8]) -> impl std::future::Future<Output = io::Result<()>> + Send;

    /// Read one frame, blocking until one arrives or the stream closes.
    fn recv_frame(&mut self) -> impl std::future::Future<Output = io::Result<Option<Frame>>> + Send;
}

const RECV_BUF_COMPACT_THRESHOLD: usize = 64 * 1024;

/// Length-prefixed framing over an async byte stream.
pub struct FramedTransport<S> {
    stream: S,
    buf: Vec<u8>,
    unread_start: usize,
    /// A tick was extracted but its acknowledgement has not been fully
    /// written yet (the ack write may be cancelled mid-frame).
    pending_ack: bool,
}

impl<S> FramedTransport<S> {
    /// Wrap an authenticated byte stream.
    pub fn new(stream: S) -> FramedTransport<S> {
        FramedTransport {
            stream,
            buf: Vec::new(),
            unread_start: 0,
            pending_ack: false,
        }
    }

    /// Consume the framing wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn compact(&mut self) {
        if self.unread_start == self.buf.len() {
            self.buf.clear();
            self.unread_start = 0;
            return;
        }
        if self.unread_start >= RECV_BUF_COMPACT_THRESHOLD && self.unread_start >= self.buf.len() / 2
        {
            self.buf.drain(..self.unread_start);
            self.unread_start = 0;
        }
    }

    /// Extract one complete frame from the accumulation buffer.
    fn try_decode_one(&mut self) -> Option<Vec<u8>> {
        let unread = &self.buf[self.unread_start..];
        if unread.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([unread[0], unread[1], unread[2], unread[3]]) as usize;
        if unread.len() < 4 + len {
            return None;
        }
        let frame = unread[4..4 + len].to_vec();
        self.unread_start += 4 + len;
        self.compact();
        Some(frame)
    }
}

impl FramedTransport<TcpStream> {
    /// Connect to a remote distribution endpoint over TCP.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<FramedTransport<TcpStream>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(FramedTransport::new(stream))
    }
}

/// TCP distribution transport.
pub type TcpTransport = FramedTransport<TcpStream>;

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn flush_pending_ack(&mut self) -> io::Result<()> {
        if self.pending_ack {
            self.stream.write_all(&0u32.to_be_bytes()).await?;
            self.stream.flush().await?;
            self.pending_ack = false;
        }
        Ok(())
    }

    async fn send_frame_inner(&mut self, payload: &[u8]) -> io::Result<()> {
        self.flush_pending_ack().await?;
        wire_spy_bytes("-->", payload);
        self.stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv_frame_inner(&mut self) -> io::Result<Option<Frame>> {
        loop {
            self.flush_pending_ack().await?;

            if let Some(frame) = self.try_decode_one() {
                if frame.is_empty() {
                    // Tick: answer in kind, surface as a no-op.
                    self.pending_ack = true;
                    self.flush_pending_ack().await?;
                    return Ok(Some(Frame::Tick));
                }
                wire_spy_bytes("<--", &frame);
                return Ok(Some(Frame::Data(frame)));
            }

            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                let trailing = self.buf.len() - self.unread_start;
                if trailing != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof inside a frame with {trailing} buffered bytes"),
                    ));
                }
                return Ok(None);
            }
            self.compact();
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        self.send_frame_inner(payload).await
    }

    async fn recv_frame(&mut self) -> io::Result<Option<Frame>> {
        self.recv_frame_inner().await
    }
}

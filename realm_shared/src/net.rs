//! Networking primitives.
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! len:u16 | opcode:u16 | body
//! ```
//!
//! `len` counts the opcode and the body, so an empty body has `len == 2`.
//! Reader and writer are split so a connection can be read by its worker
//! while a separate task writes the tick's output.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};
use tracing::{debug, trace};

/// Largest body a frame can carry.
pub const MAX_BODY_LEN: usize = u16::MAX as usize - 2;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted socket for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new_unique() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One opcode-tagged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub body: Bytes,
}

impl Frame {
    pub fn new(opcode: u16, body: Bytes) -> Self {
        Self { opcode, body }
    }

    pub fn empty(opcode: u16) -> Self {
        Self::new(opcode, Bytes::new())
    }

    /// Serializes the frame including its length prefix.
    pub fn encode(&self) -> anyhow::Result<Bytes> {
        anyhow::ensure!(
            self.body.len() <= MAX_BODY_LEN,
            "frame body of {} bytes exceeds {MAX_BODY_LEN}",
            self.body.len()
        );
        let mut buf = BytesMut::with_capacity(4 + self.body.len());
        buf.put_u16((self.body.len() + 2) as u16);
        buf.put_u16(self.opcode);
        buf.extend_from_slice(&self.body);
        Ok(buf.freeze())
    }
}

/// Reads frames from the read half of a stream.
#[derive(Debug)]
pub struct FrameReader<R = OwnedReadHalf> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next frame. `Ok(None)` means the peer closed the stream
    /// cleanly between frames.
    pub async fn recv(&mut self) -> anyhow::Result<Option<Frame>> {
        let mut len_buf = [0u8; 2];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("tcp read len"),
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        anyhow::ensure!(len >= 2, "frame length {len} shorter than its opcode");

        let mut payload = vec![0u8; len];
        self.inner
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let opcode = u16::from_be_bytes([payload[0], payload[1]]);
        let body = Bytes::from(payload).slice(2..);
        Ok(Some(Frame { opcode, body }))
    }
}

/// Writes frames to the write half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W = OwnedWriteHalf> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let bytes = frame.encode()?;
        self.send_encoded(&bytes).await
    }

    /// Writes bytes that already carry their length prefix.
    pub async fn send_encoded(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.inner.write_all(bytes).await.context("tcp write")?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.inner.shutdown().await.context("tcp shutdown")
    }
}

/// Splits a connected stream into a frame reader and writer.
pub fn split(stream: TcpStream) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

/// Connects to a server and returns the framed halves.
pub async fn connect(addr: SocketAddr) -> anyhow::Result<(FrameReader, FrameWriter)> {
    let stream = TcpStream::connect(addr).await.context("tcp connect")?;
    stream.set_nodelay(true).context("tcp nodelay")?;
    Ok(split(stream))
}

/// TCP server listener.
pub struct FrameListener {
    listener: TcpListener,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        debug!(addr = %addr, "Listener bound");
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        trace!(peer = %addr, "Accepted connection");
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

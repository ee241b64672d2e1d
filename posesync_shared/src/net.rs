//! Framed transport.
//!
//! One persistent TCP stream per client. Each message is one frame: a 4-byte
//! big-endian payload length followed by the JSON payload. Reading and
//! writing are split so a connection can be read by one task and written by
//! another.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use tracing::debug;

use crate::{
    error::{SyncError, SyncResult},
    protocol::{self, WireMessage},
};

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

fn map_read_err(e: std::io::Error) -> SyncError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted => SyncError::ConnectionLost,
        _ => SyncError::Io(e),
    }
}

/// Reading half of a framed connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            max_frame_len,
        }
    }

    /// Reads one raw frame payload.
    pub async fn recv_frame(&mut self) -> SyncResult<Bytes> {
        let mut len_buf = [0u8; FRAME_HEADER_LEN];
        self.inner
            .read_exact(&mut len_buf)
            .await
            .map_err(map_read_err)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            return Err(SyncError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let mut payload = BytesMut::zeroed(len);
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(map_read_err)?;
        Ok(payload.freeze())
    }

    /// Reads and decodes one message.
    ///
    /// Decode errors leave the stream positioned at the next frame, so the
    /// caller may keep reading unless [`SyncError::is_terminal`] says otherwise.
    pub async fn recv(&mut self) -> SyncResult<WireMessage> {
        let payload = self.recv_frame().await?;
        protocol::decode(&payload)
    }
}

/// Writing half of a framed connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one pre-encoded payload as a frame.
    pub async fn send_frame(&mut self, payload: &[u8]) -> SyncResult<()> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        self.inner
            .write_all(&buf)
            .await
            .map_err(|e| SyncError::SendFailure(e.to_string()))?;
        Ok(())
    }

    pub async fn send(&mut self, msg: &WireMessage) -> SyncResult<()> {
        let payload = protocol::encode(msg)?;
        self.send_frame(&payload).await
    }

    /// Flushes and closes the write direction.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| SyncError::SendFailure(e.to_string()))
    }
}

pub type TcpFrameReader = FrameReader<OwnedReadHalf>;
pub type TcpFrameWriter = FrameWriter<OwnedWriteHalf>;

/// Splits a TCP stream into framed halves.
pub fn split(stream: TcpStream, max_frame_len: usize) -> (TcpFrameReader, TcpFrameWriter) {
    // Pose updates are small and latency sensitive.
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not disable Nagle");
    }
    let (read, write) = stream.into_split();
    (
        FrameReader::new(read, max_frame_len),
        FrameWriter::new(write),
    )
}

/// Connects to a relay and returns framed halves.
pub async fn connect(
    addr: SocketAddr,
    max_frame_len: usize,
) -> anyhow::Result<(TcpFrameReader, TcpFrameWriter)> {
    let stream = TcpStream::connect(addr).await.context("tcp connect")?;
    Ok(split(stream, max_frame_len))
}

/// TCP listener.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await.context("tcp accept")
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

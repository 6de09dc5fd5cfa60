//! TCP Transport
//!
//! Length-prefixed framing over TCP for inter-platform traffic. Each
//! connection is split into a [`FrameReader`] owned by the reader task and a
//! [`FrameWriter`] owned by the peer's writer task, so reads never wait on
//! writes.

use crate::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use config::protocol::FRAME_HEADER_SIZE;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Bind the inter-platform listener
///
/// With `dynamic` set, a bind failure on `port` moves on to the following
/// ports, `attempts` of them at most. Port 0 lets the OS choose. Returns a
/// non-blocking std listener; convert it inside the runtime.
pub fn bind_listener(
    host: &str,
    port: u16,
    dynamic: bool,
    attempts: u16,
) -> Result<std::net::TcpListener> {
    let ip: IpAddr = host.parse().map_err(|_| {
        TransportError::configuration(format!("'{}' is not an IP address", host), Some("bind_host"))
    })?;

    let tries = if dynamic && port != 0 { attempts.max(1) } else { 1 };
    let mut last_error = None;

    for offset in 0..tries {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match std::net::TcpListener::bind(SocketAddr::new(ip, candidate)) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                if offset > 0 {
                    warn!(requested = port, bound = candidate, "Listen port taken, reassigned");
                }
                info!(addr = %listener.local_addr()?, "TCP listener bound");
                return Ok(listener);
            }
            Err(e) => {
                debug!(port = candidate, error = %e, "TCP bind failed");
                last_error = Some(e);
            }
        }
    }

    let message = format!("Failed to bind TCP listener on {}:{}", host, port);
    Err(match last_error {
        Some(e) => TransportError::network_with_source(message, e),
        None => TransportError::network(message),
    })
}

/// Connect to a peer listener with timeout
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::timeout("TCP connect", timeout.as_millis() as u64))?
        .map_err(|e| TransportError::connection_with_source("Failed to connect to peer", Some(addr), e))?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
    Ok(stream)
}

/// Split a connected stream into framed halves
pub fn split(stream: TcpStream, max_frame_size: usize) -> Result<(FrameReader, FrameWriter)> {
    let peer_addr = stream
        .peer_addr()
        .map_err(|e| TransportError::network_with_source("Failed to get peer address", e))?;
    let (read_half, write_half) = stream.into_split();
    Ok((
        FrameReader {
            half: read_half,
            peer_addr,
            max_frame_size,
            buffer: BytesMut::with_capacity(64 * 1024),
            bytes_received: 0,
        },
        FrameWriter {
            half: write_half,
            peer_addr,
            max_frame_size,
            buffer: BytesMut::with_capacity(64 * 1024),
            bytes_sent: 0,
        },
    ))
}

/// Read side of a framed connection
pub struct FrameReader {
    half: OwnedReadHalf,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    buffer: BytesMut,
    bytes_received: u64,
}

impl FrameReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Next frame payload, `None` once the peer closed the connection
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
        match self.half.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(TransportError::network_with_source("Failed to read frame length", e))
            }
        }

        let frame_len = u32::from_be_bytes(len_bytes) as usize;
        if frame_len > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                frame_len, self.max_frame_size
            )));
        }

        self.buffer.resize(frame_len, 0);
        self.half
            .read_exact(&mut self.buffer)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to read frame data", e))?;

        self.bytes_received += (FRAME_HEADER_SIZE + frame_len) as u64;
        debug!(
            peer = %self.peer_addr,
            bytes = frame_len,
            total_received = self.bytes_received,
            "Received frame"
        );
        Ok(Some(self.buffer.split_to(frame_len).freeze()))
    }
}

/// Write side of a framed connection
pub struct FrameWriter {
    half: OwnedWriteHalf,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    buffer: BytesMut,
    bytes_sent: u64,
}

impl FrameWriter {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                data.len(),
                self.max_frame_size
            )));
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(data);

        self.half
            .write_all(&self.buffer)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to write frame", e))?;
        self.half
            .flush()
            .await
            .map_err(|e| TransportError::network_with_source("Failed to flush TCP stream", e))?;

        self.bytes_sent += (FRAME_HEADER_SIZE + data.len()) as u64;
        debug!(
            peer = %self.peer_addr,
            bytes = data.len(),
            total_sent = self.bytes_sent,
            "Sent frame"
        );
        Ok(())
    }

    /// Half-close the connection
    pub async fn close(mut self) {
        if let Err(e) = self.half.shutdown().await {
            debug!(peer = %self.peer_addr, "Error shutting down TCP connection: {}", e);
        }
    }
}

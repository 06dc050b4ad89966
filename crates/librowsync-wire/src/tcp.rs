//! TCP transport
//!
//! Frames are a u32 big-endian length followed by the payload.

use std::time::Duration;

use async_trait::async_trait;
use librowsync_core::types::ids::short_hex;
use librowsync_core::PeerId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::debug;

use crate::transport::Transport;
use crate::WireError;

/// Largest frame accepted from the network (64 MiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub struct TcpTransport {
    remote: Option<PeerId>,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    /// Connect to a peer's daemon
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        peer: PeerId,
        timeout: Duration,
    ) -> Result<Self, WireError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| WireError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| WireError::Transport(format!("connect failed: {}", e)))?;
        debug!(peer = %short_hex(&peer), "tcp transport connected");
        Ok(Self::from_stream(stream, Some(peer)))
    }

    /// Wrap an accepted connection; the peer is learned from the session
    pub fn accepted(stream: TcpStream) -> Self {
        Self::from_stream(stream, None)
    }

    fn from_stream(stream: TcpStream, remote: Option<PeerId>) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            remote,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    fn check_peer(&self, peer: &PeerId) -> Result<(), WireError> {
        match &self.remote {
            Some(remote) if remote != peer => Err(WireError::Transport(format!(
                "connection belongs to {}, not {}",
                short_hex(remote),
                short_hex(peer)
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError> {
        self.check_peer(peer)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(bytes.len()));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive(&self, peer: &PeerId) -> Result<Vec<u8>, WireError> {
        self.check_peer(peer)?;
        self.receive_opening().await
    }

    async fn receive_opening(&self) -> Result<Vec<u8>, WireError> {
        let mut reader = self.reader.lock().await;
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                WireError::Transport("peer closed connection".to_string())
            } else {
                WireError::Io(e)
            }
        })?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let transport = TcpTransport::accepted(stream);
            let first = transport.receive_opening().await.unwrap();
            transport.send(&[1; 16], first.iter().rev().copied().collect()).await.unwrap();
            transport.receive(&[1; 16]).await.unwrap()
        });

        let client = TcpTransport::connect(addr, [2; 16], Duration::from_secs(5)).await.unwrap();
        client.send(&[2; 16], vec![1, 2, 3]).await.unwrap();
        assert_eq!(client.receive(&[2; 16]).await.unwrap(), vec![3, 2, 1]);
        client.send(&[2; 16], Vec::new()).await.unwrap();

        assert_eq!(server.await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_connected_transport_checks_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move { listener.accept().await });

        let client = TcpTransport::connect(addr, [2; 16], Duration::from_secs(5)).await.unwrap();
        assert!(matches!(client.send(&[3; 16], vec![1]).await, Err(WireError::Transport(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_header_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            TcpTransport::accepted(stream).receive_opening().await
        });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        assert!(matches!(server.await.unwrap(), Err(WireError::FrameTooLarge(_))));
    }
}

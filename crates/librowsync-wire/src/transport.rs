//! Transport abstraction
//!
//! Transports are point-to-point: one value carries one session's bytes to
//! and from one remote replica.

use async_trait::async_trait;
use librowsync_core::types::ids::short_hex;
use librowsync_core::PeerId;
use tokio::sync::{mpsc, Mutex};

use crate::WireError;

/// Moves opaque frames between this replica and a peer
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError>;

    async fn receive(&self, peer: &PeerId) -> Result<Vec<u8>, WireError>;

    /// Receive the first frame of a session whose peer is not known yet
    async fn receive_opening(&self) -> Result<Vec<u8>, WireError>;
}

/// Queue depth of each in-memory direction
const MEMORY_CHANNEL_CAPACITY: usize = 64;

/// In-process transport, one end of a connected pair
pub struct MemoryTransport {
    remote: PeerId,
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl MemoryTransport {
    /// Connect replicas `a` and `b`; returns (a's end, b's end)
    pub fn pair(a: PeerId, b: PeerId) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
        (
            MemoryTransport {
                remote: b,
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            MemoryTransport {
                remote: a,
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    fn check_peer(&self, peer: &PeerId) -> Result<(), WireError> {
        if *peer != self.remote {
            return Err(WireError::Transport(format!(
                "not connected to peer {}",
                short_hex(peer)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError> {
        self.check_peer(peer)?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| WireError::Transport("peer closed connection".to_string()))
    }

    async fn receive(&self, peer: &PeerId) -> Result<Vec<u8>, WireError> {
        self.check_peer(peer)?;
        self.receive_opening().await
    }

    async fn receive_opening(&self) -> Result<Vec<u8>, WireError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WireError::Transport("peer closed connection".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = MemoryTransport::pair([1; 16], [2; 16]);
        a.send(&[2; 16], vec![1]).await.unwrap();
        a.send(&[2; 16], vec![2]).await.unwrap();
        assert_eq!(b.receive_opening().await.unwrap(), vec![1]);
        assert_eq!(b.receive(&[1; 16]).await.unwrap(), vec![2]);

        b.send(&[1; 16], vec![3]).await.unwrap();
        assert_eq!(a.receive(&[2; 16]).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_wrong_peer_is_rejected() {
        let (a, _b) = MemoryTransport::pair([1; 16], [2; 16]);
        assert!(matches!(a.send(&[9; 16], vec![]).await, Err(WireError::Transport(_))));
        assert!(matches!(a.receive(&[9; 16]).await, Err(WireError::Transport(_))));
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (a, b) = MemoryTransport::pair([1; 16], [2; 16]);
        drop(b);
        assert!(a.send(&[2; 16], vec![1]).await.is_err());
        assert!(a.receive(&[2; 16]).await.is_err());
    }
}

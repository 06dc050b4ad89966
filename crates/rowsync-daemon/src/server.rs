//! Sync server
//!
//! Accepts TCP connections and serves one responder session per connection.
//! Sessions with different peers run concurrently; a second connection from a
//! peer that already has a session is turned away by the coordinator.

use std::net::SocketAddr;
use std::sync::Arc;

use librowsync_session::{CancelFlag, SyncCoordinator};
use librowsync_wire::TcpTransport;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::DaemonError;

/// Default cap on concurrently served sessions
pub const DEFAULT_MAX_SESSIONS: usize = 16;

pub struct SyncServer {
    listener: TcpListener,
    coordinator: Arc<SyncCoordinator>,
    sessions: Arc<Semaphore>,
    cancel: CancelFlag,
}

impl SyncServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: &str,
        coordinator: Arc<SyncCoordinator>,
        max_sessions: usize,
    ) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DaemonError::BindFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            listener,
            coordinator,
            sessions: Arc::new(Semaphore::new(max_sessions.max(1))),
            cancel: CancelFlag::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancels in-flight sessions that have not started committing
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<(), DaemonError> {
        info!(addr = %self.local_addr()?, "Sync server listening");
        loop {
            let permit = match Arc::clone(&self.sessions).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            debug!(%remote, "connection accepted");

            let coordinator = Arc::clone(&self.coordinator);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let transport = TcpTransport::accepted(stream);
                match coordinator.accept_sync(&transport, &cancel).await {
                    Ok(result) => info!(
                        %remote,
                        session = %result.session_id,
                        applied = result.applied_count,
                        conflicts = result.conflict_count,
                        sent = result.sent_count,
                        "Session served"
                    ),
                    Err(e) => warn!(%remote, code = e.error_code(), error = %e, "Session failed"),
                }
                drop(permit);
            });
        }
    }
}

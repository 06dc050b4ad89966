//! Sync session coordinator
//!
//! One `SyncCoordinator` per replica. `start_sync` runs the initiating side of
//! a session and `accept_sync` the responding side; both drive the same state
//! machine. At each step the initiator sends first and the responder receives
//! first, so a pair never deadlocks on a transport with bounded buffering.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use librowsync_core::config::DEFAULT_TRANSPORT_TIMEOUT_MS;
use librowsync_core::types::ids::{parse_origin_id, short_hex};
use librowsync_core::{
    ChangeRecord, CommitPlan, DeltaBatch, DeltaBuilder, PeerId, ReplicaConfig, ReplicaStore,
    RowsyncError, SyncCursor, DEFAULT_BATCH_SIZE,
};
use librowsync_wire::{
    decode_batch, decode_message, encode_batch, encode_message, Ack, Hello, SessionMessage,
    Transport, WireError, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn, Instrument};

use crate::apply::{stage_batch, stage_plan};
use crate::cancel::CancelFlag;
use crate::error::{SessionCause, SyncSessionError};
use crate::lock::SessionLocks;
use crate::state::{SessionMachine, SessionState};

/// Attempts at committing a plan before giving up on `StalePlan`
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    /// Bound on every single send or receive
    pub transport_timeout: Duration,
    /// Replicas allowed to open sessions with us; `None` accepts anyone
    pub allowed_peers: Option<BTreeSet<PeerId>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transport_timeout: Duration::from_millis(DEFAULT_TRANSPORT_TIMEOUT_MS),
            allowed_peers: None,
        }
    }
}

impl SyncConfig {
    /// Derive session settings from a replica config. Configured peers become
    /// the allow list; an empty peer table accepts anyone.
    pub fn from_replica_config(config: &ReplicaConfig) -> Result<Self, RowsyncError> {
        let allowed_peers = if config.peers.is_empty() {
            None
        } else {
            let ids = config
                .peers
                .values()
                .map(|p| parse_origin_id(&p.peer_id))
                .collect::<Result<BTreeSet<_>, _>>()?;
            Some(ids)
        };
        Ok(Self {
            batch_size: config.batch_size(),
            transport_timeout: Duration::from_millis(config.transport_timeout_ms()),
            allowed_peers,
        })
    }
}

/// Outcome of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub session_id: String,
    pub peer_id: PeerId,
    /// Remote records appended to the local log
    pub applied_count: usize,
    pub conflict_count: usize,
    /// Remote records this replica already held
    pub skipped_count: usize,
    /// Local records sent to the peer
    pub sent_count: usize,
    pub rounds: u32,
    /// The peer confirmed its commit and the sent records now count as acknowledged
    pub peer_acknowledged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

pub struct SyncCoordinator {
    replica: Arc<ReplicaStore>,
    config: SyncConfig,
    locks: SessionLocks,
}

impl SyncCoordinator {
    pub fn new(replica: Arc<ReplicaStore>, config: SyncConfig) -> Self {
        Self {
            replica,
            config,
            locks: SessionLocks::new(),
        }
    }

    pub fn replica(&self) -> &ReplicaStore {
        &self.replica
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Run a session with `peer_id`, opening it ourselves
    pub async fn start_sync<T: Transport + ?Sized>(
        &self,
        peer_id: PeerId,
        transport: &T,
        cancel: &CancelFlag,
    ) -> Result<SyncResult, SyncSessionError> {
        let _guard = self.locks.try_acquire(peer_id).ok_or_else(|| {
            SyncSessionError::new(
                None,
                SessionState::Idle,
                SessionCause::PeerBusy(short_hex(&peer_id)),
            )
        })?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("sync", session = %session_id, peer = %short_hex(&peer_id), role = "initiator");
        let session = Session::new(self, transport, peer_id, session_id, cancel.clone());
        session.run(Role::Initiator, None).instrument(span).await
    }

    /// Serve one session opened by a remote replica
    pub async fn accept_sync<T: Transport + ?Sized>(
        &self,
        transport: &T,
        cancel: &CancelFlag,
    ) -> Result<SyncResult, SyncSessionError> {
        let timeout = self.config.transport_timeout;
        let hello = receive_hello(transport, timeout)
            .await
            .map_err(|cause| SyncSessionError::new(None, SessionState::Idle, cause))?;

        let peer_id = hello.sender;
        let session_id = hello.session_id.clone();

        if let Some(allowed) = &self.config.allowed_peers {
            if !allowed.contains(&peer_id) {
                let cause = SessionCause::HandshakeMismatch(format!(
                    "replica {} is not a configured peer",
                    short_hex(&peer_id)
                ));
                return Err(reject(transport, timeout, &peer_id, session_id, cause).await);
            }
        }

        let Some(_guard) = self.locks.try_acquire(peer_id) else {
            let cause = SessionCause::PeerBusy(short_hex(&peer_id));
            return Err(reject(transport, timeout, &peer_id, session_id, cause).await);
        };

        let span = tracing::info_span!("sync", session = %session_id, peer = %short_hex(&peer_id), role = "responder");
        let session = Session::new(self, transport, peer_id, session_id, cancel.clone());
        session.run(Role::Responder, Some(hello)).instrument(span).await
    }
}

async fn receive_hello<T: Transport + ?Sized>(transport: &T, timeout: Duration) -> Result<Hello, SessionCause> {
    let bytes = with_timeout(timeout, transport.receive_opening()).await?;
    match decode_message(&bytes)? {
        SessionMessage::Hello(hello) => Ok(hello),
        other => Err(unexpected("hello", &other)),
    }
}

/// Turn away a session before it starts, telling the peer why
async fn reject<T: Transport + ?Sized>(
    transport: &T,
    timeout: Duration,
    peer: &PeerId,
    session_id: String,
    cause: SessionCause,
) -> SyncSessionError {
    warn!(peer = %short_hex(peer), error = %cause, "rejecting sync session");
    let abort = SessionMessage::Abort {
        stage: SessionState::Handshaking.as_str().to_string(),
        reason: cause.to_string(),
    };
    if let Ok(bytes) = encode_message(&abort) {
        let _ = with_timeout(timeout, transport.send(peer, bytes)).await;
    }
    SyncSessionError::new(Some(session_id), SessionState::Handshaking, cause)
}

/// Run a transport call under the session timeout
async fn with_timeout<F, R>(timeout: Duration, fut: F) -> Result<R, WireError>
where
    F: Future<Output = Result<R, WireError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(WireError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Run a commit on the blocking pool so the sled transaction never stalls
/// the runtime. The plan is handed back for restaging.
async fn commit_blocking(
    replica: Arc<ReplicaStore>,
    plan: CommitPlan,
) -> Result<(CommitPlan, Result<u64, RowsyncError>), SessionCause> {
    tokio::task::spawn_blocking(move || {
        let result = replica.commit(&plan);
        (plan, result)
    })
    .await
    .map_err(|e| SessionCause::Store(RowsyncError::Internal(format!("commit task failed: {}", e))))
}

/// Per-session working state
struct Session<'a, T: Transport + ?Sized> {
    replica: Arc<ReplicaStore>,
    config: &'a SyncConfig,
    transport: &'a T,
    peer: PeerId,
    session_id: String,
    machine: SessionMachine,
    cancel: CancelFlag,
}

impl<'a, T: Transport + ?Sized> Session<'a, T> {
    fn new(
        coordinator: &'a SyncCoordinator,
        transport: &'a T,
        peer: PeerId,
        session_id: String,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            replica: Arc::clone(&coordinator.replica),
            config: &coordinator.config,
            transport,
            peer,
            session_id,
            machine: SessionMachine::new(),
            cancel,
        }
    }

    async fn run(mut self, role: Role, opening: Option<Hello>) -> Result<SyncResult, SyncSessionError> {
        match self.exchange(role, opening).await {
            Ok(result) => {
                info!(
                    applied = result.applied_count,
                    conflicts = result.conflict_count,
                    sent = result.sent_count,
                    rounds = result.rounds,
                    "sync session complete"
                );
                Ok(result)
            }
            Err(cause) => {
                let stage = self.machine.fail();
                warn!(stage = %stage, error = %cause, "sync session failed");
                if !matches!(cause, SessionCause::PeerAborted { .. }) {
                    let abort = SessionMessage::Abort {
                        stage: stage.as_str().to_string(),
                        reason: cause.to_string(),
                    };
                    if let Err(e) = self.send(&abort).await {
                        debug!(error = %e, "could not deliver abort");
                    }
                }
                Err(SyncSessionError::new(Some(self.session_id.clone()), stage, cause))
            }
        }
    }

    async fn exchange(&mut self, role: Role, opening: Option<Hello>) -> Result<SyncResult, SessionCause> {
        // Handshaking
        self.advance(SessionState::Handshaking)?;
        let stored = self.replica.load_cursor(&self.peer)?;
        let own = self.hello(&stored)?;
        let theirs = match (role, opening) {
            (Role::Responder, Some(hello)) => {
                self.check_hello(&hello)?;
                self.send(&SessionMessage::Hello(own)).await?;
                hello
            }
            _ => {
                self.send(&SessionMessage::Hello(own)).await?;
                let hello = match self.receive().await? {
                    SessionMessage::Hello(hello) => hello,
                    other => return Err(unexpected("hello", &other)),
                };
                self.check_hello(&hello)?;
                hello
            }
        };
        let known = self.merge_known(stored, &theirs)?;
        debug!(origins = known.acknowledged.len(), "handshake complete");

        // Delta rounds
        let builder = DeltaBuilder::new(self.config.batch_size);
        let mut outgoing = known.clone();
        let mut plan = CommitPlan::new(self.replica.generation()?, known.clone());
        let mut received: Vec<DeltaBatch> = Vec::new();
        let mut sent: Vec<ChangeRecord> = Vec::new();
        let mut sequence: u32 = 0;

        loop {
            self.advance(SessionState::ExchangingDeltas)?;
            let page = builder.build(self.replica.log(), &outgoing)?;
            let batch = DeltaBatch::seal(sequence, page, outgoing.clone())?;
            let local_more = batch.has_more;

            let remote = match role {
                Role::Initiator => {
                    self.send_batch(&batch).await?;
                    self.receive_batch(sequence).await?
                }
                Role::Responder => {
                    let remote = self.receive_batch(sequence).await?;
                    self.send_batch(&batch).await?;
                    remote
                }
            };
            debug!(sequence, sent = batch.len(), received = remote.len(), "round exchanged");

            self.advance(SessionState::ApplyingRemote)?;
            stage_batch(&self.replica, &known, &mut plan, &remote)?;

            outgoing.advance_past(&batch.changes);
            sent.extend(batch.changes);
            let remote_more = remote.has_more;
            received.push(remote);
            sequence += 1;

            if !local_more && !remote_more {
                break;
            }
        }

        // Committing: runs to completion once entered
        self.advance(SessionState::Committing)?;
        let mut attempt = 1;
        loop {
            let (staged, result) = commit_blocking(Arc::clone(&self.replica), plan).await?;
            plan = staged;
            match result {
                Ok(generation) => {
                    debug!(generation, attempt, "plan committed");
                    break;
                }
                Err(RowsyncError::StalePlan { staged, current }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    debug!(staged, current, attempt, "plan went stale, restaging");
                    plan = stage_plan(&self.replica, &known, &received)?;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let stats = plan.stats();
        let ack = Ack {
            session_id: self.session_id.clone(),
            applied: stats.applied as u64,
            conflicts: stats.conflicts as u64,
            skipped: stats.skipped as u64,
        };
        let peer_acknowledged = match self.exchange_acks(role, ack).await {
            Ok(peer_ack) => {
                debug!(applied = peer_ack.applied, conflicts = peer_ack.conflicts, "peer acknowledged");
                match self.replica.advance_cursor(&self.peer, &sent) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(error = %e, "could not record acknowledged records");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "peer did not acknowledge; sent records will be offered again");
                false
            }
        };

        self.advance(SessionState::Idle)?;
        Ok(SyncResult {
            session_id: self.session_id.clone(),
            peer_id: self.peer,
            applied_count: stats.applied,
            conflict_count: stats.conflicts,
            skipped_count: stats.skipped,
            sent_count: sent.len(),
            rounds: sequence,
            peer_acknowledged,
        })
    }

    fn hello(&self, stored: &SyncCursor) -> Result<Hello, SessionCause> {
        Ok(Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            sender: *self.replica.replica_id(),
            cursor_view: stored.clone(),
            heads: self.replica.log().heads()?,
        })
    }

    fn check_hello(&self, hello: &Hello) -> Result<(), SessionCause> {
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(SessionCause::HandshakeMismatch(format!(
                "peer speaks protocol {}, expected {}",
                hello.protocol_version, PROTOCOL_VERSION
            )));
        }
        if hello.sender != self.peer {
            return Err(SessionCause::HandshakeMismatch(format!(
                "expected peer {}, connected to {}",
                short_hex(&self.peer),
                short_hex(&hello.sender)
            )));
        }
        if hello.cursor_view.peer_id != *self.replica.replica_id() {
            return Err(SessionCause::HandshakeMismatch(format!(
                "peer's cursor belongs to {}, not this replica",
                short_hex(&hello.cursor_view.peer_id)
            )));
        }
        if hello.session_id != self.session_id {
            return Err(SessionCause::HandshakeMismatch(format!(
                "session id {} does not match {}",
                hello.session_id, self.session_id
            )));
        }
        Ok(())
    }

    /// Combine our stored cursor with the peer's view of it.
    ///
    /// An origin only counts up to what both replicas hold: the peer's view is
    /// capped by our heads and the result by the peer's heads. A peer that lost
    /// records since the last session is offered them again.
    fn merge_known(&self, stored: SyncCursor, theirs: &Hello) -> Result<SyncCursor, SessionCause> {
        let heads = self.replica.log().heads()?;
        let mut combined = stored;
        for (origin, &clock) in &theirs.cursor_view.acknowledged {
            let held = heads.get(origin).copied().unwrap_or(0);
            combined.advance(*origin, clock.min(held));
        }

        let mut known = SyncCursor::new(self.peer);
        for (origin, &clock) in &combined.acknowledged {
            let held = theirs.heads.get(origin).copied().unwrap_or(0);
            if clock > held {
                warn!(
                    origin = %short_hex(origin),
                    cursor = clock,
                    peer_head = held,
                    "peer holds less than our cursor claims, resending"
                );
            }
            if clock.min(held) > 0 {
                known.advance(*origin, clock.min(held));
            }
        }
        Ok(known)
    }

    async fn exchange_acks(&self, role: Role, ack: Ack) -> Result<Ack, SessionCause> {
        let own = SessionMessage::Ack(ack);
        let theirs = match role {
            Role::Initiator => {
                self.send(&own).await?;
                self.receive().await?
            }
            Role::Responder => {
                let theirs = self.receive().await?;
                self.send(&own).await?;
                theirs
            }
        };
        match theirs {
            SessionMessage::Ack(ack) if ack.session_id == self.session_id => Ok(ack),
            SessionMessage::Ack(ack) => Err(SessionCause::UnexpectedMessage(format!(
                "ack for session {}",
                ack.session_id
            ))),
            other => Err(unexpected("ack", &other)),
        }
    }

    /// Move the state machine, honouring cancellation outside the commit
    fn advance(&mut self, next: SessionState) -> Result<(), SessionCause> {
        if self.machine.state().is_cancellable() && self.cancel.is_cancelled() {
            return Err(SessionCause::Cancelled);
        }
        self.machine.advance(next)
    }

    async fn send(&self, message: &SessionMessage) -> Result<(), SessionCause> {
        let bytes = encode_message(message)?;
        with_timeout(self.config.transport_timeout, self.transport.send(&self.peer, bytes)).await?;
        Ok(())
    }

    async fn send_batch(&self, batch: &DeltaBatch) -> Result<(), SessionCause> {
        let envelope = encode_batch(batch)?;
        self.send(&SessionMessage::Batch(envelope)).await
    }

    async fn receive(&self) -> Result<SessionMessage, SessionCause> {
        let receive = with_timeout(self.config.transport_timeout, self.transport.receive(&self.peer));
        let bytes = if self.machine.state().is_cancellable() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionCause::Cancelled),
                result = receive => result?,
            }
        } else {
            receive.await?
        };

        match decode_message(&bytes)? {
            SessionMessage::Abort { stage, reason } => Err(SessionCause::PeerAborted { stage, reason }),
            message => Ok(message),
        }
    }

    /// Receive and verify the peer's page for round `sequence`
    async fn receive_batch(&self, sequence: u32) -> Result<DeltaBatch, SessionCause> {
        let envelope = match self.receive().await? {
            SessionMessage::Batch(envelope) => envelope,
            other => return Err(unexpected("batch", &other)),
        };
        let batch = decode_batch(&envelope)?;
        if batch.sequence != sequence {
            return Err(SessionCause::UnexpectedMessage(format!(
                "batch {} out of order, expected {}",
                batch.sequence, sequence
            )));
        }
        if batch.sender_cursor_snapshot.peer_id != *self.replica.replica_id() {
            return Err(SessionCause::HandshakeMismatch(
                "batch was built for a different replica".to_string(),
            ));
        }
        Ok(batch)
    }
}

fn unexpected(expected: &str, got: &SessionMessage) -> SessionCause {
    SessionCause::UnexpectedMessage(format!("expected {}, got {}", expected, got.kind()))
}

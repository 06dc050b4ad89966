//! Two-replica sync scenarios over in-memory transports

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use librowsync_core::{
    ColumnValue, OriginId, Payload, PeerId, ReplicaStore, ResolutionPolicy, ResolutionReason,
    SnapshotStore, SyncCursor,
};
use librowsync_session::{
    CancelFlag, SessionCause, SessionState, SyncConfig, SyncCoordinator, SyncResult,
    SyncSessionError,
};
use librowsync_wire::{MemoryTransport, Transport, WireError};
use tempfile::TempDir;

const A: OriginId = [0xa; 16];
const B: OriginId = [0xb; 16];
const C: OriginId = [0xc; 16];

struct Replica {
    _dir: TempDir,
    coordinator: SyncCoordinator,
}

impl Replica {
    fn new(id: OriginId, policy: ResolutionPolicy, config: SyncConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = ReplicaStore::open(&dir.path().join("sled"), id, policy).unwrap();
        Self {
            _dir: dir,
            coordinator: SyncCoordinator::new(Arc::new(store), config),
        }
    }

    fn symmetric(id: OriginId) -> Self {
        Self::new(id, ResolutionPolicy::Symmetric, SyncConfig::default())
    }

    fn store(&self) -> &ReplicaStore {
        self.coordinator.replica()
    }

    fn put(&self, row: &str, v: i64) {
        let mut p = Payload::new();
        p.insert("v".to_string(), ColumnValue::Integer(v));
        self.store().put_row("items", row, p).unwrap();
    }

    fn value(&self, row: &str) -> Option<ColumnValue> {
        self.store()
            .snapshot()
            .read_row("items", row)
            .unwrap()
            .and_then(|p| p.get("v").cloned())
    }
}

type SessionOutcome = Result<SyncResult, SyncSessionError>;

async fn sync_over<T: Transport>(
    initiator: &Replica,
    responder: &Replica,
    initiator_end: &T,
    responder_end: &T,
) -> (SessionOutcome, SessionOutcome) {
    let cancel = CancelFlag::new();
    let peer = *responder.store().replica_id();
    tokio::join!(
        initiator.coordinator.start_sync(peer, initiator_end, &cancel),
        responder.coordinator.accept_sync(responder_end, &cancel),
    )
}

async fn sync(initiator: &Replica, responder: &Replica) -> (SyncResult, SyncResult) {
    let (ta, tb) = MemoryTransport::pair(*initiator.store().replica_id(), *responder.store().replica_id());
    let (a, b) = sync_over(initiator, responder, &ta, &tb).await;
    (a.unwrap(), b.unwrap())
}

/// Wraps a memory transport and injects one fault
struct FaultyTransport {
    inner: MemoryTransport,
    sends: AtomicUsize,
    receives: AtomicUsize,
    corrupt_send: Option<usize>,
    hang_on_receive: Option<usize>,
}

impl FaultyTransport {
    fn new(inner: MemoryTransport) -> Self {
        Self {
            inner,
            sends: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
            corrupt_send: None,
            hang_on_receive: None,
        }
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn send(&self, peer: &PeerId, mut bytes: Vec<u8>) -> Result<(), WireError> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if self.corrupt_send == Some(n) {
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
        }
        self.inner.send(peer, bytes).await
    }

    async fn receive(&self, peer: &PeerId) -> Result<Vec<u8>, WireError> {
        let n = self.receives.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_on_receive == Some(n) {
            std::future::pending::<()>().await;
        }
        self.inner.receive(peer).await
    }

    async fn receive_opening(&self) -> Result<Vec<u8>, WireError> {
        self.inner.receive_opening().await
    }
}

#[tokio::test]
async fn test_disjoint_changes_converge() {
    let a = Replica::symmetric(A);
    let b = Replica::symmetric(B);
    a.put("1", 10);
    a.put("2", 20);
    b.put("3", 30);

    let (ra, rb) = sync(&a, &b).await;
    assert_eq!(ra.applied_count, 1);
    assert_eq!(rb.applied_count, 2);
    assert_eq!(ra.sent_count, 2);
    assert_eq!(ra.conflict_count, 0);
    assert_eq!(ra.session_id, rb.session_id);
    assert!(ra.peer_acknowledged && rb.peer_acknowledged);

    for replica in [&a, &b] {
        assert_eq!(replica.value("1"), Some(ColumnValue::Integer(10)));
        assert_eq!(replica.value("3"), Some(ColumnValue::Integer(30)));
        assert_eq!(replica.store().log().len(), 3);
    }

    // Cursors record what both sides hold
    assert_eq!(a.store().load_cursor(&B).unwrap().clock_for(&A), 2);
    assert_eq!(a.store().load_cursor(&B).unwrap().clock_for(&B), 1);
    assert_eq!(b.store().load_cursor(&A).unwrap().clock_for(&A), 2);

    // Nothing left to exchange
    let (ra, rb) = sync(&a, &b).await;
    assert_eq!(ra.sent_count + rb.sent_count, 0);
    assert_eq!(ra.applied_count + rb.applied_count, 0);
}

#[tokio::test]
async fn test_equal_clock_conflict_picks_greater_origin() {
    let a = Replica::symmetric(A);
    let b = Replica::symmetric(B);
    a.put("7", 1);
    b.put("7", 2);

    let (ra, rb) = sync(&a, &b).await;
    assert_eq!(ra.conflict_count, 1);
    assert_eq!(rb.conflict_count, 1);

    for replica in [&a, &b] {
        let winner = replica.store().log().winning_record("items", "7").unwrap().unwrap();
        assert_eq!(winner.origin_id, B);
        assert_eq!(winner.logical_clock, 1);
        assert_eq!(replica.value("7"), Some(ColumnValue::Integer(2)));

        let conflicts = replica.store().conflicts().for_row("items", "7").unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].winner.origin_id, B);
        assert_eq!(conflicts[0].loser.origin_id, A);
        assert_eq!(conflicts[0].resolution_reason, ResolutionReason::OriginTieBreak);
    }

    // The losing change is never replicated into the winner's log
    assert!(b.store().log().get(&A, 1).unwrap().is_none());
    assert_eq!(b.store().log().last_clock(&A).unwrap(), Some(1));
}

#[tokio::test]
async fn test_timeout_leaves_initiator_untouched_and_resumes() {
    let config = SyncConfig {
        transport_timeout: Duration::from_millis(200),
        ..SyncConfig::default()
    };
    let a = Replica::new(A, ResolutionPolicy::Symmetric, config);
    let b = Replica::symmetric(B);
    a.put("1", 1);
    a.put("2", 2);
    b.put("3", 3);
    b.put("4", 4);
    b.put("5", 5);

    let (ta, tb) = MemoryTransport::pair(A, B);
    let mut ta = FaultyTransport::new(ta);
    // First receive is the hello, second is the peer's batch
    ta.hang_on_receive = Some(2);
    let tb = FaultyTransport::new(tb);
    let (ra, _rb) = sync_over(&a, &b, &ta, &tb).await;

    let err = ra.unwrap_err();
    assert_eq!(err.stage, SessionState::ExchangingDeltas);
    assert!(err.is_timeout());
    assert!(err.is_retryable());
    assert_eq!(a.store().load_cursor(&B).unwrap(), SyncCursor::new(B));
    assert_eq!(a.store().log().len(), 2);
    assert_eq!(a.store().snapshot().row_count(), 2);

    let (ra, rb) = sync(&a, &b).await;
    assert_eq!(ra.applied_count, 3);
    assert_eq!(rb.applied_count, 0);
    for replica in [&a, &b] {
        assert_eq!(replica.store().log().len(), 5);
        assert_eq!(replica.store().snapshot().row_count(), 5);
        assert_eq!(replica.value("4"), Some(ColumnValue::Integer(4)));
    }
}

#[tokio::test]
async fn test_paged_exchange_matches_single_round() {
    let paged = SyncConfig {
        batch_size: 4,
        ..SyncConfig::default()
    };
    let a1 = Replica::new(A, ResolutionPolicy::Symmetric, paged.clone());
    let b1 = Replica::new(B, ResolutionPolicy::Symmetric, paged);
    let a2 = Replica::symmetric(A);
    let b2 = Replica::symmetric(B);
    for i in 0..25 {
        a1.put(&format!("a{}", i), i);
        a2.put(&format!("a{}", i), i);
    }
    for i in 0..13 {
        b1.put(&format!("b{}", i), i);
        b2.put(&format!("b{}", i), i);
    }

    let (paged_a, paged_b) = sync(&a1, &b1).await;
    let (single_a, _) = sync(&a2, &b2).await;

    assert_eq!(paged_a.rounds, 7);
    assert_eq!(single_a.rounds, 1);
    assert_eq!(paged_a.applied_count, single_a.applied_count);
    assert_eq!(paged_b.applied_count, 25);

    for (paged, single) in [(&a1, &a2), (&b1, &b2)] {
        assert_eq!(
            paged.store().snapshot().list_rows("items").unwrap(),
            single.store().snapshot().list_rows("items").unwrap()
        );
        assert_eq!(paged.store().log().heads().unwrap(), single.store().log().heads().unwrap());
        assert_eq!(paged.store().log().len(), 38);
    }
}

#[tokio::test]
async fn test_resending_everything_is_a_no_op() {
    let a = Replica::symmetric(A);
    let b = Replica::symmetric(B);
    a.put("1", 1);
    a.put("2", 2);
    sync(&a, &b).await;

    let rows_before = b.store().snapshot().list_rows("items").unwrap();
    let log_before = b.store().log().len();

    a.store().reset_cursor(&B).unwrap();
    b.store().reset_cursor(&A).unwrap();
    let (ra, rb) = sync(&a, &b).await;

    assert_eq!(ra.sent_count, 2);
    assert_eq!(rb.applied_count, 0);
    assert_eq!(rb.skipped_count, 2);
    assert_eq!(b.store().snapshot().list_rows("items").unwrap(), rows_before);
    assert_eq!(b.store().log().len(), log_before);
}

#[tokio::test]
async fn test_peer_that_lost_its_log_is_offered_everything_again() {
    let a = Replica::symmetric(A);
    let b = Replica::symmetric(B);
    a.put("1", 1);
    a.put("2", 2);
    sync(&a, &b).await;
    assert_eq!(a.store().load_cursor(&B).unwrap().clock_for(&A), 2);

    // Same replica id, empty store: the old cursor overstates what B holds
    let restored = Replica::symmetric(B);
    let (ra, rb) = sync(&a, &restored).await;

    assert_eq!(ra.sent_count, 2);
    assert_eq!(rb.applied_count, 2);
    assert_eq!(restored.value("1"), Some(ColumnValue::Integer(1)));
    assert_eq!(restored.value("2"), Some(ColumnValue::Integer(2)));
    assert_eq!(a.store().load_cursor(&B).unwrap().clock_for(&A), 2);
}

#[tokio::test]
async fn test_corrupt_batch_fails_both_sides() {
    let a = Replica::symmetric(A);
    let b = Replica::symmetric(B);
    a.put("1", 1);
    b.put("2", 2);

    let (ta, tb) = MemoryTransport::pair(A, B);
    let mut ta = FaultyTransport::new(ta);
    // First send is the hello, second is our batch
    ta.corrupt_send = Some(2);
    let tb = FaultyTransport::new(tb);
    let (ra, rb) = sync_over(&a, &b, &ta, &tb).await;

    let err = rb.unwrap_err();
    assert_eq!(err.stage, SessionState::ExchangingDeltas);
    assert!(matches!(err.cause, SessionCause::Wire(WireError::CorruptBatch(_))));
    assert!(matches!(ra.unwrap_err().cause, SessionCause::PeerAborted { .. }));

    assert_eq!(a.store().log().len(), 1);
    assert_eq!(b.store().log().len(), 1);
    assert!(b.value("1").is_none());
}

#[tokio::test]
async fn test_wrong_peer_fails_handshake() {
    let a = Replica::symmetric(A);
    let c = Replica::symmetric(C);

    // A believes it is talking to B, but C answers
    let (ta, tc) = MemoryTransport::pair(A, B);
    let cancel = CancelFlag::new();
    let (ra, rc) = tokio::join!(
        a.coordinator.start_sync(B, &ta, &cancel),
        c.coordinator.accept_sync(&tc, &cancel),
    );

    let err = rc.unwrap_err();
    assert_eq!(err.stage, SessionState::Handshaking);
    assert!(matches!(err.cause, SessionCause::HandshakeMismatch(_)));
    assert_eq!(err.error_code(), "handshake_mismatch");
    assert!(matches!(ra.unwrap_err().cause, SessionCause::PeerAborted { .. }));
}

#[tokio::test]
async fn test_unlisted_peer_is_rejected() {
    let mut allowed = std::collections::BTreeSet::new();
    allowed.insert(C);
    let config = SyncConfig {
        allowed_peers: Some(allowed),
        ..SyncConfig::default()
    };
    let a = Replica::symmetric(A);
    let b = Replica::new(B, ResolutionPolicy::Symmetric, config);

    let (ta, tb) = MemoryTransport::pair(A, B);
    let (ra, rb) = sync_over(&a, &b, &ta, &tb).await;
    assert!(matches!(rb.unwrap_err().cause, SessionCause::HandshakeMismatch(_)));
    assert!(matches!(ra.unwrap_err().cause, SessionCause::PeerAborted { .. }));
}

#[tokio::test]
async fn test_one_session_per_peer() {
    let a = Replica::symmetric(A);
    let _held = a.coordinator.locks().try_acquire(B).unwrap();

    let (ta, _tb) = MemoryTransport::pair(A, B);
    let err = a
        .coordinator
        .start_sync(B, &ta, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err.cause, SessionCause::PeerBusy(_)));
    assert_eq!(err.stage, SessionState::Idle);

    // A different peer is not blocked
    assert!(a.coordinator.locks().try_acquire(C).is_some());
}

#[tokio::test]
async fn test_cancelled_session_writes_nothing() {
    let a = Replica::symmetric(A);
    a.put("1", 1);
    let (ta, _tb) = MemoryTransport::pair(A, B);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = a.coordinator.start_sync(B, &ta, &cancel).await.unwrap_err();
    assert!(matches!(err.cause, SessionCause::Cancelled));
    assert_eq!(err.stage, SessionState::Idle);
    assert_eq!(a.store().load_cursor(&B).unwrap(), SyncCursor::new(B));
    assert!(!a.coordinator.locks().is_locked(&B));
}

#[tokio::test]
async fn test_delete_wins_policy_on_clock_tie() {
    let a = Replica::new(A, ResolutionPolicy::DeleteWins, SyncConfig::default());
    let b = Replica::new(B, ResolutionPolicy::DeleteWins, SyncConfig::default());
    a.put("1", 1);
    sync(&a, &b).await;

    // Both at clock 2: A deletes, B updates
    a.store().delete_row("items", "1").unwrap();
    b.put("1", 99);
    let (ra, rb) = sync(&a, &b).await;
    assert_eq!(ra.conflict_count, 1);
    assert_eq!(rb.conflict_count, 1);

    for replica in [&a, &b] {
        assert!(replica.value("1").is_none());
        let conflicts = replica.store().conflicts().list().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].winner.origin_id, A);
        assert_eq!(conflicts[0].resolution_reason, ResolutionReason::DeletePrecedence);
    }
}

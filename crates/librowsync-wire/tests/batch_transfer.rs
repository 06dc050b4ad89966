//! End-to-end batch transfer: build from a store, frame, move, decode

use librowsync_core::{
    ColumnValue, DeltaBatch, DeltaBuilder, Payload, ReplicaStore, ResolutionPolicy, SyncCursor,
};
use librowsync_wire::{
    decode_batch, decode_message, encode_batch, encode_message, MemoryTransport, SessionMessage,
    Transport, WireError,
};
use tempfile::tempdir;

const A: [u8; 16] = [0xa; 16];
const B: [u8; 16] = [0xb; 16];

fn store_with_rows(n: usize) -> (tempfile::TempDir, ReplicaStore) {
    let dir = tempdir().unwrap();
    let store = ReplicaStore::open(&dir.path().join("sled"), A, ResolutionPolicy::Symmetric).unwrap();
    for i in 0..n {
        let mut p = Payload::new();
        p.insert("qty".to_string(), ColumnValue::Integer(i as i64));
        store.put_row("stock", &format!("sku-{}", i), p).unwrap();
    }
    (dir, store)
}

#[tokio::test]
async fn test_batch_survives_transport() {
    let (_dir, store) = store_with_rows(12);
    let cursor = SyncCursor::new(B);
    let page = DeltaBuilder::new(5).build(store.log(), &cursor).unwrap();
    let batch = DeltaBatch::seal(0, page, cursor).unwrap();

    let (a, b) = MemoryTransport::pair(A, B);
    let frame = encode_message(&SessionMessage::Batch(encode_batch(&batch).unwrap())).unwrap();
    a.send(&B, frame).await.unwrap();

    let received = b.receive(&A).await.unwrap();
    let decoded = match decode_message(&received).unwrap() {
        SessionMessage::Batch(envelope) => decode_batch(&envelope).unwrap(),
        other => panic!("unexpected message {}", other.kind()),
    };

    assert_eq!(decoded, batch);
    assert_eq!(decoded.len(), 5);
    assert!(decoded.has_more);
    assert!(decoded.verify().unwrap());
}

#[tokio::test]
async fn test_corruption_in_transit_is_detected() {
    let (_dir, store) = store_with_rows(3);
    let cursor = SyncCursor::new(B);
    let page = DeltaBuilder::default().build(store.log(), &cursor).unwrap();
    let batch = DeltaBatch::seal(0, page, cursor).unwrap();

    let mut envelope = encode_batch(&batch).unwrap();
    let mid = envelope.len() - 10;
    envelope[mid] = envelope[mid].wrapping_add(1);

    assert!(matches!(decode_batch(&envelope), Err(WireError::CorruptBatch(_))));
}

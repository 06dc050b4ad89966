//! Stress tests for concurrent replica writes
//!
//! Local writes from many threads must all land with distinct clocks, and the
//! store must stay internally consistent.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use librowsync_core::integrity::check_log_integrity;
use librowsync_core::types::ids::generate_origin_id;
use librowsync_core::{ColumnValue, Payload, ReplicaStore, ResolutionPolicy};
use tempfile::tempdir;

fn payload(n: usize) -> Payload {
    let mut p = Payload::new();
    p.insert("n".to_string(), ColumnValue::Integer(n as i64));
    p
}

#[test]
fn test_concurrent_local_writes() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        ReplicaStore::open(&dir.path().join("sled"), generate_origin_id(), ResolutionPolicy::Symmetric)
            .expect("Failed to open store"),
    );

    let num_threads = 8;
    let writes_per_thread = 40;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut clocks = Vec::new();
                for i in 0..writes_per_thread {
                    let row = format!("{}-{}", thread_id, i % 5);
                    match store.put_row("counter", &row, payload(i)) {
                        Ok(record) => clocks.push(record.logical_clock),
                        Err(e) => eprintln!("Thread {} write {} failed: {:?}", thread_id, i, e),
                    }
                }
                clocks
            })
        })
        .collect();

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }

    let expected = num_threads * writes_per_thread;
    assert_eq!(all.len(), expected, "Expected {} successful writes", expected);

    let unique: HashSet<u64> = all.iter().copied().collect();
    assert_eq!(unique.len(), expected, "clocks must be unique per origin");
    assert_eq!(*unique.iter().max().unwrap(), expected as u64);

    assert_eq!(store.log().len(), expected);
    assert_eq!(store.snapshot().list_rows("counter").unwrap().len(), num_threads * 5);

    let report = check_log_integrity(&store).unwrap();
    assert!(report.is_healthy(), "{:?}", report.issues);
}

#[test]
fn test_reopen_preserves_rows_and_clock() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sled");
    let id = generate_origin_id();

    {
        let store = ReplicaStore::open(&path, id, ResolutionPolicy::Symmetric).unwrap();
        for i in 0..10 {
            store.put_row("t", &i.to_string(), payload(i)).unwrap();
        }
        store.flush().unwrap();
    }

    let store = ReplicaStore::open(&path, id, ResolutionPolicy::Symmetric).unwrap();
    assert_eq!(store.snapshot().list_rows("t").unwrap().len(), 10);
    let next = store.put_row("t", "0", payload(99)).unwrap();
    assert_eq!(next.logical_clock, 11);
}

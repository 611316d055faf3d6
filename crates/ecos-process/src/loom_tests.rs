//! Loom tests for the shared process state
//!
//! Models the context lock with loom's `Mutex` around the real
//! `ProcessState`, and explores every interleaving of concurrent senders.
//!
//! # Running Loom Tests
//!
//! ```bash
//! cargo test --package ecos-process --features loom -- --test-threads=1 loom
//! ```

use alloc::vec::Vec;
use loom::sync::{Arc, Mutex};
use loom::thread;

use crate::ledger::{DeliveryState, ProcessState, SentRecord};

/// One send's critical sections: allocate + insert, then mark Sent.
fn model_send(state: &Mutex<ProcessState>) -> u64 {
    let seq = {
        let mut guard = state.lock().unwrap();
        let seq = guard.allocate_sequence();
        guard.ledger.insert(SentRecord::new(seq, 9, 1, 0, 1000), 0);
        guard.ledger.advance(seq, DeliveryState::Sending);
        seq
    };
    // kernel send happens here, outside the lock
    state.lock().unwrap().ledger.advance(seq, DeliveryState::Sent);
    seq
}

#[test]
fn loom_sequences_unique_across_threads() {
    loom::model(|| {
        let state = Arc::new(Mutex::new(ProcessState::new(4, 1)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || model_send(&state))
            })
            .collect();

        let mut seqs: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, [1, 2]);

        let guard = state.lock().unwrap();
        assert_eq!(guard.ledger.len(), 2);
        assert!(guard.ledger.iter().all(|r| r.state == DeliveryState::Sent));
    });
}

#[test]
fn loom_sequence_increases_in_program_order() {
    loom::model(|| {
        let state = Arc::new(Mutex::new(ProcessState::new(4, 1)));

        let other = {
            let state = state.clone();
            thread::spawn(move || model_send(&state))
        };
        let first = model_send(&state);
        let second = model_send(&state);
        assert!(second > first);

        other.join().unwrap();
    });
}

#[test]
fn loom_full_ledger_never_exceeds_capacity() {
    loom::model(|| {
        let state = Arc::new(Mutex::new(ProcessState::new(1, 1)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || model_send(&state))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(state.lock().unwrap().ledger.len(), 1);
    });
}

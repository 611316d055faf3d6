//! Sent-message ledger
//!
//! Bounded record of in-flight and recently sent messages, keyed by
//! sequence number. The ledger itself is plain data; `IpcContext` wraps it
//! (together with the sequence counter and the local inbox) in a single
//! `spin::Mutex`.
//!
//! # Delivery state machine
//!
//! ```text
//! Pending -> Sending -> Sent -> Delivered -> Received
//!                  |        |            \-> (side states)
//!                  |        |-> DeliveryFailed
//!                  |        |-> Received        (implied delivery)
//!                  |        \-> (side states)
//!                  |-> SentFailed
//!                  \-> (side states)
//!
//! side states: PermissionDenied, LostMessage, Unknown
//! ```
//!
//! # Overflow policy
//!
//! Inserting into a full ledger evicts, in order of preference, the oldest
//! record in a terminal state, then the oldest record whose timeout has
//! elapsed. If neither exists the new record is not retained; the send
//! still happens and later queries report `Unknown`.
//!
//! # Expiry
//!
//! A record still in flight once its own timeout has elapsed is settled by
//! [`Ledger::expire`]: `Sent` and `Delivered` become `Unknown` (the kernel
//! took the envelope, no further status will arrive), `Pending` and
//! `Sending` become `LostMessage`.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use ecos_ipc::{Envelope, Feedback, Pid, Sequence};

/// Delivery state of a sent-message record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// Record created, nothing handed to the kernel yet
    Pending,
    /// Being handed to the kernel
    Sending,
    /// Kernel accepted the envelope
    Sent,
    /// Kernel rejected the envelope at the send step
    SentFailed,
    /// Placed in the receiver's queue
    Delivered,
    /// Could not be placed in the receiver's queue
    DeliveryFailed,
    /// Consumed by the receiver
    Received,
    /// Sender may not reach the receiver
    PermissionDenied,
    /// Kernel lost the message
    LostMessage,
    /// No status available; treat as transport-level success
    Unknown,
}

impl DeliveryState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::SentFailed
                | DeliveryState::DeliveryFailed
                | DeliveryState::Received
                | DeliveryState::PermissionDenied
                | DeliveryState::LostMessage
                | DeliveryState::Unknown
        )
    }

    /// Whether the message definitely did not arrive.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeliveryState::SentFailed
                | DeliveryState::DeliveryFailed
                | DeliveryState::PermissionDenied
                | DeliveryState::LostMessage
        )
    }

    /// Legal transitions of the delivery state machine.
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        let side = matches!(next, PermissionDenied | LostMessage | Unknown);
        match self {
            Pending => next == Sending,
            Sending => matches!(next, Sent | SentFailed) || side,
            Sent => matches!(next, Delivered | DeliveryFailed | Received) || side,
            Delivered => next == Received || side,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sending => "sending",
            DeliveryState::Sent => "sent",
            DeliveryState::SentFailed => "sent-failed",
            DeliveryState::Delivered => "delivered",
            DeliveryState::DeliveryFailed => "delivery-failed",
            DeliveryState::Received => "received",
            DeliveryState::PermissionDenied => "permission-denied",
            DeliveryState::LostMessage => "lost",
            DeliveryState::Unknown => "unknown",
        }
    }
}

/// One entry of the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentRecord {
    pub sequence: Sequence,
    pub dest_pid: Pid,
    pub message_id: u32,
    /// Monotonic send time, ms
    pub sent_at_ms: u64,
    pub timeout_ms: u32,
    pub state: DeliveryState,
    /// Receiver's response, once `Received`
    pub response: Option<Vec<u8>>,
}

impl SentRecord {
    pub fn new(
        sequence: Sequence,
        dest_pid: Pid,
        message_id: u32,
        sent_at_ms: u64,
        timeout_ms: u32,
    ) -> Self {
        Self {
            sequence,
            dest_pid,
            message_id,
            sent_at_ms,
            timeout_ms,
            state: DeliveryState::Pending,
            response: None,
        }
    }

    /// Whether the record's timeout has elapsed at `now_ms`.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.sent_at_ms) > self.timeout_ms as u64
    }
}

/// Outcome of applying a transition to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// State changed
    Applied(DeliveryState),
    /// Report ignored; the record keeps its current state
    Ignored(DeliveryState),
    /// Illegal transition, ignored
    Illegal {
        from: DeliveryState,
        to: DeliveryState,
    },
    /// No record for this sequence
    Untracked,
}

/// Bounded sent-message ledger.
pub struct Ledger {
    records: VecDeque<SentRecord>,
    capacity: usize,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, seq: Sequence) -> Option<&SentRecord> {
        self.records.iter().find(|r| r.sequence == seq)
    }

    /// Current state; `Unknown` for sequences the ledger does not track.
    pub fn state(&self, seq: Sequence) -> DeliveryState {
        self.get(seq)
            .map(|r| r.state)
            .unwrap_or(DeliveryState::Unknown)
    }

    /// Insert a record, evicting per the overflow policy.
    ///
    /// Returns `false` if the record was not retained.
    pub fn insert(&mut self, record: SentRecord, now_ms: u64) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.records.len() >= self.capacity {
            let victim = self
                .records
                .iter()
                .position(|r| r.state.is_terminal())
                .or_else(|| self.records.iter().position(|r| r.is_stale(now_ms)));
            match victim {
                Some(idx) => {
                    self.records.remove(idx);
                }
                None => return false,
            }
        }
        self.records.push_back(record);
        true
    }

    /// Move a record to `next` if the state machine allows it.
    pub fn advance(&mut self, seq: Sequence, next: DeliveryState) -> Advance {
        let Some(record) = self.records.iter_mut().find(|r| r.sequence == seq) else {
            return Advance::Untracked;
        };
        if record.state == next {
            return Advance::Ignored(next);
        }
        if !record.state.can_transition_to(next) {
            return Advance::Illegal {
                from: record.state,
                to: next,
            };
        }
        record.state = next;
        Advance::Applied(next)
    }

    /// Apply one kernel feedback report.
    pub fn apply_feedback(&mut self, seq: Sequence, feedback: Feedback) -> Advance {
        let next = match feedback {
            Feedback::Sending => {
                // Stale progress report; absorbed unless still pending.
                return match self.state(seq) {
                    DeliveryState::Pending => self.advance(seq, DeliveryState::Sending),
                    current if self.get(seq).is_some() => Advance::Ignored(current),
                    _ => Advance::Untracked,
                };
            }
            Feedback::Delivered => DeliveryState::Delivered,
            Feedback::Received(response) => {
                let outcome = self.advance(seq, DeliveryState::Received);
                if let Advance::Applied(_) = outcome {
                    if let Some(record) = self.records.iter_mut().find(|r| r.sequence == seq) {
                        record.response = Some(response);
                    }
                }
                return outcome;
            }
            Feedback::DeliveryFailed => DeliveryState::DeliveryFailed,
            Feedback::PermissionDenied => DeliveryState::PermissionDenied,
            Feedback::Lost => DeliveryState::LostMessage,
            Feedback::Unknown => DeliveryState::Unknown,
        };
        self.advance(seq, next)
    }

    /// Settle every in-flight record whose timeout has elapsed at `now_ms`.
    ///
    /// Returns the settled sequences with their new state.
    pub fn expire(&mut self, now_ms: u64) -> Vec<(Sequence, DeliveryState)> {
        let mut settled = Vec::new();
        for record in self.records.iter_mut() {
            if record.state.is_terminal() || !record.is_stale(now_ms) {
                continue;
            }
            record.state = match record.state {
                DeliveryState::Sent | DeliveryState::Delivered => DeliveryState::Unknown,
                _ => DeliveryState::LostMessage,
            };
            settled.push((record.sequence, record.state));
        }
        settled
    }

    /// Remove a record.
    pub fn remove(&mut self, seq: Sequence) -> Option<SentRecord> {
        let idx = self.records.iter().position(|r| r.sequence == seq)?;
        self.records.remove(idx)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &SentRecord> {
        self.records.iter()
    }
}

/// Process-local state guarded by the context lock.
pub(crate) struct ProcessState {
    pub ledger: Ledger,
    /// Next sequence to hand out (starts at 1)
    next_seq: Sequence,
    /// Locally synthesized envelopes, drained before kernel receive
    pub inbox: VecDeque<Envelope>,
    inbox_capacity: usize,
}

impl ProcessState {
    pub fn new(ledger_capacity: usize, inbox_capacity: usize) -> Self {
        Self {
            ledger: Ledger::new(ledger_capacity),
            next_seq: 1,
            inbox: VecDeque::with_capacity(inbox_capacity),
            inbox_capacity,
        }
    }

    /// Allocate the next sequence. Never returns the same value twice.
    pub fn allocate_sequence(&mut self) -> Sequence {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Queue a synthesized envelope. Returns `false` if the inbox is full.
    pub fn push_inbox(&mut self, envelope: Envelope) -> bool {
        if self.inbox.len() >= self.inbox_capacity {
            return false;
        }
        self.inbox.push_back(envelope);
        true
    }
}

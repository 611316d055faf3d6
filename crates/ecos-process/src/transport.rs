//! Message transport for IpcContext.
//!
//! This module contains methods for:
//! - Sending envelopes (with optional delivery feedback)
//! - Broadcasting to every process
//! - Receiving (local inbox first, then the kernel)
//! - Inspecting and clearing the receive queue
//! - Querying delivery state of a sent sequence

use alloc::format;
use alloc::vec::Vec;

use ecos_hal::{Kernel, SendFault};
use ecos_ipc::{
    msg, send_failed, Envelope, Pid, Sequence, BROADCAST_PID, MAX_PAYLOAD_LEN, MAX_VALID_PID,
};

use crate::error::IpcError;
use crate::ledger::{Advance, DeliveryState, SentRecord};
use crate::IpcContext;

impl<K: Kernel> IpcContext<K> {
    /// Send an envelope to `receiver`.
    ///
    /// With `need_feedback` the kernel reports delivery progress, observable
    /// through [`IpcContext::state`].
    ///
    /// # Returns
    /// * `Ok(seq)` - Kernel accepted the envelope
    /// * `Err(PermissionDenied)` - `receiver` above `MAX_VALID_PID`
    /// * `Err(BufferOverflow)` - payload above `MAX_PAYLOAD_LEN`
    /// * `Err(InvalidEndpoint | QueueFull | ServiceUnavailable)` - kernel rejected it
    pub fn send(
        &self,
        receiver: Pid,
        message_id: u32,
        payload: &[u8],
        need_feedback: bool,
    ) -> Result<Sequence, IpcError> {
        self.send_with_timeout(
            receiver,
            message_id,
            payload,
            need_feedback,
            self.config.record_timeout_ms,
        )
    }

    /// Like [`IpcContext::send`], recording `timeout_ms` on the ledger entry.
    pub fn send_with_timeout(
        &self,
        receiver: Pid,
        message_id: u32,
        payload: &[u8],
        need_feedback: bool,
        timeout_ms: u32,
    ) -> Result<Sequence, IpcError> {
        if receiver > MAX_VALID_PID {
            self.log(&format!("send: rejected pid={} above max", receiver));
            return Err(IpcError::PermissionDenied);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(IpcError::BufferOverflow {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let now = self.kernel.now_ms();
        let (seq, tracked) = {
            let mut state = self.state.lock();
            let seq = state.allocate_sequence();
            let tracked = state
                .ledger
                .insert(SentRecord::new(seq, receiver, message_id, now, timeout_ms), now);
            if tracked {
                state.ledger.advance(seq, DeliveryState::Sending);
            }
            (seq, tracked)
        };
        if !tracked {
            self.log(&format!("send: ledger full, seq={} untracked", seq));
        }

        let envelope = Envelope {
            message_id,
            sender_pid: self.pid(),
            receiver_pid: receiver,
            payload: payload.to_vec(),
            sequence: seq,
            timestamp: now,
            flags: 0,
        };
        let result = self.kernel.send_envelope(&envelope, need_feedback, seq);

        match result {
            Ok(()) => {
                if tracked {
                    self.state.lock().ledger.advance(seq, DeliveryState::Sent);
                }
                Ok(seq)
            }
            Err(fault) => {
                let notice = need_feedback.then(|| self.send_failed_notice(&envelope, fault));
                let queued = {
                    let mut state = self.state.lock();
                    if tracked {
                        state.ledger.advance(seq, DeliveryState::SentFailed);
                    }
                    notice.is_some_and(|n| state.push_inbox(n))
                };
                self.log(&format!(
                    "send: failed seq={} to={} msg=0x{:08x} err={} notice={}",
                    seq, receiver, message_id, fault, queued
                ));
                Err(fault.into())
            }
        }
    }

    /// Announce to every process. No per-recipient tracking.
    pub fn broadcast(&self, message_id: u32, flags: u32, payload: &[u8]) -> Result<(), IpcError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(IpcError::BufferOverflow {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let envelope = Envelope {
            message_id,
            sender_pid: self.pid(),
            receiver_pid: BROADCAST_PID,
            payload: payload.to_vec(),
            sequence: 0,
            timestamp: self.kernel.now_ms(),
            flags,
        };
        self.kernel.broadcast_envelope(&envelope)?;
        Ok(())
    }

    /// Wait for the next envelope addressed to this process.
    ///
    /// `timeout_ms == 0` waits indefinitely. Only the calling thread blocks.
    /// Envelopes without a timestamp are stamped with the current time.
    pub fn receive(&self, timeout_ms: u32) -> Result<Envelope, IpcError> {
        let queued = self.state.lock().inbox.pop_front();
        if let Some(envelope) = queued {
            return Ok(envelope);
        }

        match self.kernel.receive_envelope(timeout_ms)? {
            Some(mut envelope) => {
                if envelope.timestamp == 0 {
                    envelope.timestamp = self.kernel.now_ms();
                }
                Ok(envelope)
            }
            None => Err(IpcError::Timeout),
        }
    }

    /// Number of envelopes waiting for this process.
    pub fn queue_len(&self) -> Result<usize, IpcError> {
        let local = self.state.lock().inbox.len();
        Ok(local + self.kernel.pending_count()?)
    }

    /// Message type and sender of the next envelope, without consuming it.
    pub fn peek(&self) -> Result<Option<(u32, Pid)>, IpcError> {
        let local = self
            .state
            .lock()
            .inbox
            .front()
            .map(|e| (e.message_id, e.sender_pid));
        match local {
            Some(head) => Ok(Some(head)),
            None => Ok(self.kernel.peek_envelope()?),
        }
    }

    /// Drop every waiting envelope.
    pub fn clear_queue(&self) -> Result<(), IpcError> {
        self.state.lock().inbox.clear();
        self.kernel.clear_pending()?;
        Ok(())
    }

    /// Current delivery state of `seq`, refreshed from kernel feedback.
    ///
    /// `Unknown` for sequences the ledger does not track: treat as
    /// transport-level success with no further status. Records past their
    /// timeout are settled first (see `Ledger::expire`).
    pub fn state(&self, seq: Sequence) -> DeliveryState {
        let mut reports = Vec::new();
        while let Some(feedback) = self.kernel.delivery_feedback(seq) {
            reports.push(feedback);
        }

        let now = self.kernel.now_ms();
        let mut illegal = Vec::new();
        let (current, expired) = {
            let mut state = self.state.lock();
            for feedback in reports {
                if let Advance::Illegal { from, to } = state.ledger.apply_feedback(seq, feedback) {
                    illegal.push((from, to));
                }
            }
            let expired = state.ledger.expire(now);
            (state.ledger.state(seq), expired)
        };

        for (expired_seq, settled) in expired {
            self.log(&format!(
                "ledger: expired seq={} -> {}",
                expired_seq,
                settled.name()
            ));
        }

        for (from, to) in illegal {
            self.log(&format!(
                "ledger: ignored transition seq={} {} -> {}",
                seq,
                from.name(),
                to.name()
            ));
        }
        current
    }

    /// Remove a record once its outcome has been consumed.
    pub fn forget(&self, seq: Sequence) -> Option<SentRecord> {
        self.state.lock().ledger.remove(seq)
    }

    fn send_failed_notice(&self, failed: &Envelope, fault: SendFault) -> Envelope {
        let code = match fault {
            SendFault::InvalidEndpoint => send_failed::INVALID_ENDPOINT,
            SendFault::QueueFull => send_failed::QUEUE_FULL,
            SendFault::Unavailable => send_failed::SERVICE_UNAVAILABLE,
        };
        let mut payload = Vec::with_capacity(17);
        payload.extend_from_slice(&failed.sequence.to_le_bytes());
        payload.extend_from_slice(&failed.receiver_pid.to_le_bytes());
        payload.extend_from_slice(&failed.message_id.to_le_bytes());
        payload.push(code);

        Envelope {
            message_id: msg::IPC_MSG_SEND_FAILED,
            sender_pid: self.pid(),
            receiver_pid: self.pid(),
            payload,
            sequence: failed.sequence,
            timestamp: self.kernel.now_ms(),
            flags: 0,
        }
    }
}

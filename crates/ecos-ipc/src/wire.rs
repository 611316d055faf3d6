//! Wire types exchanged with the kernel primitive
//!
//! All types here are pure data. Behavior that needs the kernel (time,
//! process identity) lives in `ecos-process`.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Process identifier
pub type Pid = u32;

/// Per-process message sequence number (starts at 1, never reused)
pub type Sequence = u64;

/// A single IPC message unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation selector / message type
    pub message_id: u32,
    /// Sender's PID
    pub sender_pid: Pid,
    /// Receiver's PID (`BROADCAST_PID` for all processes)
    pub receiver_pid: Pid,
    /// Message payload (at most `MAX_PAYLOAD_LEN` bytes)
    pub payload: Vec<u8>,
    /// Sender-local sequence number (0 for broadcasts)
    pub sequence: Sequence,
    /// Send time in milliseconds (0 = unset)
    pub timestamp: u64,
    /// Message flags (shutdown flags for announcements, 0 otherwise)
    pub flags: u32,
}

impl Envelope {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether this envelope was addressed to every process.
    pub fn is_broadcast(&self) -> bool {
        self.receiver_pid == crate::BROADCAST_PID
    }

    /// Payload interpreted as UTF-8 text, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}

/// Delivery feedback reported by the kernel for a tracked sequence.
///
/// The kernel only reports feedback for sends made with `need_feedback`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feedback {
    /// Still being handed off
    Sending,
    /// Placed in the receiver's queue
    Delivered,
    /// Consumed by the receiver; carries its response bytes
    Received(Vec<u8>),
    /// Could not be placed in the receiver's queue
    DeliveryFailed,
    /// Sender lacks permission to reach the receiver
    PermissionDenied,
    /// The kernel lost track of the message
    Lost,
    /// The kernel cannot say
    Unknown,
}

/// A time-boxed, ownership-checked grant for privileged operations.
///
/// An empty token (`id == 0`) is never valid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Kernel-issued token id
    pub id: u64,
    /// Bitmask of `capability::*` bits
    pub capabilities: u32,
    /// The only process allowed to use or release the token
    pub owner_pid: Pid,
    /// Absolute expiry, seconds on the wall clock
    pub valid_until: u64,
    /// Short description (at most `MAX_DESCRIPTION_LEN` bytes)
    pub description: String,
}

impl CapabilityToken {
    /// Whether this token has been cleared (or was never issued).
    pub fn is_empty(&self) -> bool {
        self.id == 0
    }

    /// Whether the token's validity window has passed at `now_secs`.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        now_secs > self.valid_until
    }

    /// Whether every bit in `required` is present.
    pub fn covers(&self, required: u32) -> bool {
        self.capabilities & required == required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability;

    #[test]
    fn test_token_expiry_is_strict() {
        let token = CapabilityToken {
            id: 7,
            capabilities: capability::SHUTDOWN,
            owner_pid: 3,
            valid_until: 100,
            description: String::from("t"),
        };
        assert!(!token.is_expired(100));
        assert!(token.is_expired(101));
    }

    #[test]
    fn test_token_covers_subset_only() {
        let token = CapabilityToken {
            id: 1,
            capabilities: capability::SHUTDOWN | capability::REBOOT,
            ..Default::default()
        };
        assert!(token.covers(capability::SHUTDOWN));
        assert!(token.covers(capability::SHUTDOWN | capability::REBOOT));
        assert!(!token.covers(capability::KILL_PROCESS));
        assert!(token.covers(0));
    }

    #[test]
    fn test_default_token_is_empty() {
        assert!(CapabilityToken::default().is_empty());
    }

    #[test]
    fn test_envelope_broadcast_flag() {
        let env = Envelope {
            message_id: crate::msg::IPC_MSG_SHUTDOWN_REQUEST,
            sender_pid: 5,
            receiver_pid: crate::BROADCAST_PID,
            payload: b"SHUTDOWN:reason=0:message=bye".to_vec(),
            sequence: 0,
            timestamp: 0,
            flags: 0,
        };
        assert!(env.is_broadcast());
        assert_eq!(env.payload_str(), Some("SHUTDOWN:reason=0:message=bye"));
    }
}

//! Error types for the process-side IPC library

use alloc::string::String;
use core::fmt;

use ecos_hal::{KernelError, SendFault};

/// Errors surfaced by every operation of this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpcError {
    /// Bad input caught before any transport activity
    InvalidParameter,
    /// Ledger or registration table full
    ResourceLimit,
    /// Allocation failed
    OutOfMemory,
    /// Token used or released by a process other than its owner
    NotOwner,
    /// Token past its validity window
    Expired,
    /// Capability check failed, or the receiver is not reachable by this sender
    PermissionDenied,
    /// Peer or directory unreachable
    ServiceUnavailable,
    /// Poll budget exhausted or blocking receive timed out
    Timeout,
    /// Payload exceeds the maximum size
    BufferOverflow { len: usize, max: usize },
    /// Kernel rejected the send: receiver endpoint does not exist
    InvalidEndpoint,
    /// Kernel rejected the send: receiver queue full
    QueueFull,
    /// Directory does not know the name
    NotFound,
    /// Duplicate registration
    AlreadyRegistered,
    /// Peer answered with a malformed response
    Protocol(String),
}

impl IpcError {
    /// Failures a caller may fix by acquiring (or renewing) a capability.
    ///
    /// `send` also reports a receiver above `MAX_VALID_PID` as
    /// `PermissionDenied`; no capability makes such a pid reachable, so
    /// check the pid range before retrying on this classification.
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            IpcError::PermissionDenied | IpcError::NotOwner | IpcError::Expired
        )
    }

    /// Failures of the message transport itself (systemic, escalate).
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            IpcError::ServiceUnavailable
                | IpcError::Timeout
                | IpcError::InvalidEndpoint
                | IpcError::QueueFull
                | IpcError::BufferOverflow { .. }
        )
    }

    /// "No such peer": the directory was unreachable or the name is unknown.
    pub fn is_no_such_peer(&self) -> bool {
        matches!(
            self,
            IpcError::NotFound
                | IpcError::ServiceUnavailable
                | IpcError::Timeout
                | IpcError::InvalidEndpoint
        )
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcError::InvalidParameter => write!(f, "Invalid parameter"),
            IpcError::ResourceLimit => write!(f, "Resource limit reached"),
            IpcError::OutOfMemory => write!(f, "Out of memory"),
            IpcError::NotOwner => write!(f, "Not the token owner"),
            IpcError::Expired => write!(f, "Token expired"),
            IpcError::PermissionDenied => write!(f, "Permission denied"),
            IpcError::ServiceUnavailable => write!(f, "Service unavailable"),
            IpcError::Timeout => write!(f, "Timed out"),
            IpcError::BufferOverflow { len, max } => {
                write!(f, "Payload too large: {} bytes (max {})", len, max)
            }
            IpcError::InvalidEndpoint => write!(f, "Invalid endpoint"),
            IpcError::QueueFull => write!(f, "Receiver queue full"),
            IpcError::NotFound => write!(f, "Not found"),
            IpcError::AlreadyRegistered => write!(f, "Already registered"),
            IpcError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl From<SendFault> for IpcError {
    fn from(fault: SendFault) -> Self {
        match fault {
            SendFault::InvalidEndpoint => IpcError::InvalidEndpoint,
            SendFault::QueueFull => IpcError::QueueFull,
            SendFault::Unavailable => IpcError::ServiceUnavailable,
        }
    }
}

impl From<KernelError> for IpcError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::PermissionDenied => IpcError::PermissionDenied,
            KernelError::NotFound => IpcError::NotFound,
            KernelError::InvalidArgument => IpcError::InvalidParameter,
            KernelError::OutOfMemory => IpcError::OutOfMemory,
            KernelError::Unavailable | KernelError::NotSupported => {
                IpcError::ServiceUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_and_transport_failures_are_disjoint() {
        let all = [
            IpcError::InvalidParameter,
            IpcError::ResourceLimit,
            IpcError::OutOfMemory,
            IpcError::NotOwner,
            IpcError::Expired,
            IpcError::PermissionDenied,
            IpcError::ServiceUnavailable,
            IpcError::Timeout,
            IpcError::BufferOverflow { len: 5000, max: 4096 },
            IpcError::InvalidEndpoint,
            IpcError::QueueFull,
            IpcError::NotFound,
            IpcError::AlreadyRegistered,
            IpcError::Protocol(String::from("bad")),
        ];
        for e in &all {
            assert!(!(e.is_capability_failure() && e.is_transport_failure()), "{}", e);
        }
    }

    #[test]
    fn test_send_fault_mapping() {
        assert_eq!(IpcError::from(SendFault::InvalidEndpoint), IpcError::InvalidEndpoint);
        assert_eq!(IpcError::from(SendFault::QueueFull), IpcError::QueueFull);
        assert_eq!(
            IpcError::from(SendFault::Unavailable),
            IpcError::ServiceUnavailable
        );
    }

    #[test]
    fn test_no_such_peer() {
        assert!(IpcError::NotFound.is_no_such_peer());
        assert!(IpcError::ServiceUnavailable.is_no_such_peer());
        assert!(!IpcError::PermissionDenied.is_no_such_peer());
    }
}

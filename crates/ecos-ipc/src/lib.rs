//! IPC Protocol Constants & Wire Types for E-comOS
//!
//! This crate defines:
//! - **Reserved message types** (Process ↔ Process notifications)
//! - **Service command ids** (requests carried by synchronous calls)
//! - **Capability bits**, shutdown reasons and flags
//! - **Well-known PIDs** and reserved addresses
//! - **Wire types** exchanged with the kernel (`Envelope`, `Feedback`,
//!   `CapabilityToken`)
//!
//! It is the **single source of truth** for all protocol constants. Other
//! processes in the system recognize the message type values structurally,
//! so they form a closed, stable set.
//!
//! # Message Type Allocation
//!
//! | Value        | ASCII  | Meaning                                  |
//! |--------------|--------|------------------------------------------|
//! | 0x53485554   | "SHUT" | Shutdown / reboot request broadcast      |
//! | 0x45584954   | "EXIT" | Exit request                             |
//! | 0x57414954   | "WAIT" | Appendix-S: save in progress, please wait|
//! | 0x4F4B5448   | "OKTH" | Appendix-S: save complete, thanks        |
//! | 0x444F4E54   | "DONT" | Do-not-kill-children notification        |
//! | 0x53455256   | "SERV" | Service up/down notice                   |
//! | 0x53464149   | "SFAI" | Locally synthesized send-failed notice   |
//!
//! # Usage
//!
//! ```rust
//! use ecos_ipc::{msg, capability, pid};
//!
//! let tag = msg::IPC_MSG_SHUTDOWN_REQUEST;
//! let needed = capability::SHUTDOWN | capability::REBOOT;
//! let directory = pid::DIRECTORY;
//! # let _ = (tag, needed, directory);
//! ```

#![no_std]
extern crate alloc;

mod wire;

pub use wire::{CapabilityToken, Envelope, Feedback, Pid, Sequence};

// =============================================================================
// Limits & Reserved Addresses
// =============================================================================

/// Hard cap on an envelope payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Process ids above this value are never valid send targets.
pub const MAX_VALID_PID: Pid = 0xFFFF;

/// Reserved receiver address meaning "all processes".
pub const BROADCAST_PID: Pid = 0xFFFF_FFFF;

/// Maximum length of a capability token description, in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 64;

/// Maximum length of a service directory name, in bytes.
pub const MAX_SERVICE_NAME_LEN: usize = 63;

/// Maximum length of a shutdown/reboot message, in bytes.
pub const MAX_SHUTDOWN_MESSAGE_LEN: usize = 255;

// =============================================================================
// Reserved Message Types
// =============================================================================

/// Reserved message types recognized by every process in the system.
pub mod msg {
    /// Shutdown or reboot announcement ("SHUT").
    /// Payload: `SHUTDOWN:reason=<n>:message=<text>` or `REBOOT:...`
    pub const IPC_MSG_SHUTDOWN_REQUEST: u32 = 0x5348_5554;

    /// Exit request ("EXIT").
    pub const IPC_MSG_EXIT_REQUEST: u32 = 0x4558_4954;

    /// Appendix-S: the sender is saving state and asks for time ("WAIT").
    /// Payload: `WAIT`
    pub const IPC_MSG_APPENDIX_S_WAIT: u32 = 0x5741_4954;

    /// Appendix-S: save finished, power-off may proceed ("OKTH").
    pub const IPC_MSG_APPENDIX_S_OKTHANKS: u32 = 0x4F4B_5448;

    /// Do-not-kill-children notification and exemption request ("DONT").
    /// Payload (broadcast): `DO_NOT_KILL:<pid>` or `DO_NOT_KILL_EMERGENCY:<pid>`
    /// Payload (exemption request): `[pid: u32 LE]`
    pub const IPC_MSG_DO_NOT_KILL: u32 = 0x444F_4E54;

    /// Service registration / unregistration notice ("SERV").
    pub const IPC_MSG_SERVICE_NOTICE: u32 = 0x5345_5256;

    /// Synthesized locally when the kernel rejects a feedback-requesting send.
    /// Payload: `[seq: u64 LE, dest_pid: u32 LE, msg_id: u32 LE, error: u8]`
    pub const IPC_MSG_SEND_FAILED: u32 = 0x5346_4149;

    /// The closed set of reserved types, in declaration order.
    pub const RESERVED: [u32; 7] = [
        IPC_MSG_SHUTDOWN_REQUEST,
        IPC_MSG_EXIT_REQUEST,
        IPC_MSG_APPENDIX_S_WAIT,
        IPC_MSG_APPENDIX_S_OKTHANKS,
        IPC_MSG_DO_NOT_KILL,
        IPC_MSG_SERVICE_NOTICE,
        IPC_MSG_SEND_FAILED,
    ];

    /// Whether `message_id` is one of the reserved system types.
    pub fn is_reserved(message_id: u32) -> bool {
        RESERVED.contains(&message_id)
    }
}

/// Error codes carried in the `IPC_MSG_SEND_FAILED` payload.
pub mod send_failed {
    /// Target endpoint does not exist
    pub const INVALID_ENDPOINT: u8 = 1;
    /// Target queue is full
    pub const QUEUE_FULL: u8 = 2;
    /// IPC service unavailable
    pub const SERVICE_UNAVAILABLE: u8 = 3;
}

// =============================================================================
// Service Directory Protocol (0x5001 - 0x5004)
// =============================================================================

/// Service directory commands.
///
/// Requests and responses are JSON-serialized (see `ecos_process::directory`).
pub mod directory {
    /// Lookup a service by name.
    /// Payload: JSON `{ "service_name": String }`
    pub const SERVICE_CMD_LOOKUP: u32 = 0x5001;

    /// Register a name → pid mapping.
    /// Payload: JSON `{ "service_name": String, "pid": u32 }`
    pub const SERVICE_CMD_REGISTER: u32 = 0x5002;

    /// Remove a mapping.
    /// Payload: JSON `{ "service_name": String }`
    pub const SERVICE_CMD_UNREGISTER: u32 = 0x5003;

    /// Generic directory response.
    pub const SERVICE_CMD_RESP: u32 = 0x5004;

    /// Response status: success
    pub const STATUS_OK: i32 = 0;
    /// Response status: name not registered
    pub const STATUS_NOT_FOUND: i32 = -2;
    /// Response status: name already registered
    pub const STATUS_EXISTS: i32 = -3;
    /// Response status: directory table full
    pub const STATUS_FULL: i32 = -4;
}

// =============================================================================
// Capability Bits
// =============================================================================

/// Privileged operation bits carried in `CapabilityToken::capabilities`.
pub mod capability {
    /// Power off the machine
    pub const SHUTDOWN: u32 = 1 << 0;
    /// Reboot the machine
    pub const REBOOT: u32 = 1 << 1;
    /// Suspend to RAM
    pub const SUSPEND: u32 = 1 << 2;
    /// Hibernate to disk
    pub const HIBERNATE: u32 = 1 << 3;
    /// Terminate another process
    pub const KILL_PROCESS: u32 = 1 << 4;
    /// Modify system configuration
    pub const CHANGE_CONFIG: u32 = 1 << 5;
    /// Every capability
    pub const ALL: u32 = 0xFFFF_FFFF;
}

// =============================================================================
// Shutdown Reasons & Flags
// =============================================================================

/// Why the system is going down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum ShutdownReason {
    /// Normal shutdown
    Normal = 0,
    /// Reboot
    Reboot = 1,
    /// Emergency shutdown
    Emergency = 2,
    /// Explicit user request
    UserRequest = 3,
    /// Power failure
    PowerFailure = 4,
    /// Overheating
    Thermal = 5,
    /// Kernel panic
    Panic = 6,
}

impl ShutdownReason {
    /// Convert from the numeric value carried on the wire.
    ///
    /// Returns `None` for unknown values.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ShutdownReason::Normal),
            1 => Some(ShutdownReason::Reboot),
            2 => Some(ShutdownReason::Emergency),
            3 => Some(ShutdownReason::UserRequest),
            4 => Some(ShutdownReason::PowerFailure),
            5 => Some(ShutdownReason::Thermal),
            6 => Some(ShutdownReason::Panic),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownReason::Normal => "normal",
            ShutdownReason::Reboot => "reboot",
            ShutdownReason::Emergency => "emergency",
            ShutdownReason::UserRequest => "user-request",
            ShutdownReason::PowerFailure => "power-failure",
            ShutdownReason::Thermal => "thermal",
            ShutdownReason::Panic => "panic",
        }
    }
}

/// Shutdown / reboot flags.
pub mod shutdown_flags {
    /// Give processes time to finish
    pub const GRACEFUL: u32 = 1 << 0;
    /// Do not wait for processes
    pub const FORCE: u32 = 1 << 1;
    /// Skip the announcement broadcast entirely (emergency paths)
    pub const NOWAIT: u32 = 1 << 2;
    /// Suppress logging
    pub const NOLOG: u32 = 1 << 3;
}

// =============================================================================
// Well-Known PIDs
// =============================================================================

/// Well-known process IDs.
///
/// These are the defaults; `ecos_process::IpcConfig` can override each one.
pub mod pid {
    use crate::Pid;

    /// The kernel pseudo-process (exemption requests are addressed here)
    pub const KERNEL: Pid = 0;
    /// Service directory (name → pid registry)
    pub const DIRECTORY: Pid = 1;
    /// Power-management / shutdown coordination process
    pub const POWER_MANAGER: Pid = 1000;
}

// =============================================================================
// Debug Message Protocol (String Prefixes)
// =============================================================================

/// String prefixes used in broadcast payloads.
///
/// Broadcast payloads are plain text so any process can parse them without
/// sharing a binary layout.
pub mod notice {
    /// Shutdown announcement: "SHUTDOWN:reason={n}:message={text}"
    pub const SHUTDOWN: &str = "SHUTDOWN:";
    /// Reboot announcement: "REBOOT:reason={n}:message={text}"
    pub const REBOOT: &str = "REBOOT:";
    /// Child protection: "DO_NOT_KILL:{pid}"
    pub const DO_NOT_KILL: &str = "DO_NOT_KILL:";
    /// Child protection, emergency kill allowed: "DO_NOT_KILL_EMERGENCY:{pid}"
    pub const DO_NOT_KILL_EMERGENCY: &str = "DO_NOT_KILL_EMERGENCY:";
    /// Service up: "SERVICE_REGISTER:{name}:{pid}"
    pub const SERVICE_REGISTER: &str = "SERVICE_REGISTER:";
    /// Service down: "SERVICE_UNREGISTER:{name}"
    pub const SERVICE_UNREGISTER: &str = "SERVICE_UNREGISTER:";
    /// Appendix-S wait body
    pub const WAIT: &str = "WAIT";
    /// Appendix-S completion body
    pub const OKTHANKS: &str = "OKTH";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_types_match_ascii() {
        // CRITICAL: These values MUST NOT change!
        assert_eq!(msg::IPC_MSG_SHUTDOWN_REQUEST.to_be_bytes(), *b"SHUT");
        assert_eq!(msg::IPC_MSG_EXIT_REQUEST.to_be_bytes(), *b"EXIT");
        assert_eq!(msg::IPC_MSG_APPENDIX_S_WAIT.to_be_bytes(), *b"WAIT");
        assert_eq!(msg::IPC_MSG_APPENDIX_S_OKTHANKS.to_be_bytes(), *b"OKTH");
        assert_eq!(msg::IPC_MSG_DO_NOT_KILL.to_be_bytes(), *b"DONT");
        assert_eq!(msg::IPC_MSG_SERVICE_NOTICE.to_be_bytes(), *b"SERV");
    }

    #[test]
    fn test_reserved_types_are_distinct() {
        for (i, a) in msg::RESERVED.iter().enumerate() {
            for b in &msg::RESERVED[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(msg::is_reserved(msg::IPC_MSG_DO_NOT_KILL));
        assert!(!msg::is_reserved(directory::SERVICE_CMD_LOOKUP));
    }

    #[test]
    fn test_reserved_addresses() {
        assert!(BROADCAST_PID > MAX_VALID_PID);
        assert!(pid::POWER_MANAGER <= MAX_VALID_PID);
        assert!(pid::DIRECTORY <= MAX_VALID_PID);
    }

    #[test]
    fn test_capability_bits_disjoint() {
        let bits = [
            capability::SHUTDOWN,
            capability::REBOOT,
            capability::SUSPEND,
            capability::HIBERNATE,
            capability::KILL_PROCESS,
            capability::CHANGE_CONFIG,
        ];
        let mut seen = 0u32;
        for bit in bits {
            assert_eq!(seen & bit, 0);
            seen |= bit;
        }
        assert_eq!(seen & capability::ALL, seen);
    }

    #[test]
    fn test_shutdown_reason_from_u32() {
        for val in 0..=6u32 {
            let reason = ShutdownReason::from_u32(val).expect("valid value");
            assert_eq!(reason as u32, val);
        }
        assert!(ShutdownReason::from_u32(7).is_none());
    }
}

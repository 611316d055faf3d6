//! Kernel Abstraction trait for E-comOS processes
//!
//! This crate defines the `Kernel` trait: the opaque boundary below which the
//! process-side IPC library does not look. The trap mechanism, the scheduler
//! and the wire format used to reach the kernel are all hidden behind it.
//!
//! # Implementations
//!
//! - **Native target**: system-call shims provided by the platform runtime
//! - **Tests**: `ecos-hal-mock` simulates a multi-process world with a
//!   deterministic clock

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use ecos_ipc::{CapabilityToken, Envelope, Feedback, Pid, Sequence};

/// Kernel Abstraction trait
///
/// Implementations provide platform-specific functionality for:
/// - Process identity and time
/// - The send / receive / broadcast primitive and its delivery feedback
/// - Child-process protection
/// - The capability grant authority and virtual port
/// - Power control
///
/// Every method may be called concurrently from several threads of the same
/// process. Only `receive_envelope` and `sleep_ms` may block.
pub trait Kernel: Send + Sync {
    // === Identity & Time ===

    /// PID of the calling process.
    fn current_pid(&self) -> Pid;

    /// Monotonic time in milliseconds (tick counter).
    fn now_ms(&self) -> u64;

    /// Wall-clock time in seconds since the Unix epoch.
    ///
    /// Capability token expiry (`valid_until`) is measured on this clock.
    fn wallclock_secs(&self) -> u64;

    /// Suspend the calling thread for `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);

    // === Debug ===

    /// Write a debug line to the platform's log.
    fn debug_write(&self, msg: &str);

    // === Transport ===

    /// Hand an envelope to the kernel for delivery.
    ///
    /// Reports the outcome of the *send step only*. With `need_feedback`, the
    /// kernel later reports delivery progress for `seq` through
    /// `delivery_feedback`.
    ///
    /// # Returns
    /// * `Ok(())` - Kernel accepted the envelope
    /// * `Err(SendFault::InvalidEndpoint)` - Receiver does not exist
    /// * `Err(SendFault::QueueFull)` - Receiver's queue is full
    /// * `Err(SendFault::Unavailable)` - IPC service not running
    fn send_envelope(
        &self,
        envelope: &Envelope,
        need_feedback: bool,
        seq: Sequence,
    ) -> Result<(), SendFault>;

    /// Deliver an envelope to every process. No per-recipient feedback.
    fn broadcast_envelope(&self, envelope: &Envelope) -> Result<(), SendFault>;

    /// Block until an envelope arrives for this process or `timeout_ms`
    /// elapses (`0` = wait indefinitely).
    ///
    /// # Returns
    /// * `Ok(Some(envelope))` - Message received
    /// * `Ok(None)` - Timed out
    /// * `Err(KernelError)` - IPC service unavailable
    fn receive_envelope(&self, timeout_ms: u32) -> Result<Option<Envelope>, KernelError>;

    /// Latest delivery feedback for a tracked sequence, if any is new.
    fn delivery_feedback(&self, seq: Sequence) -> Option<Feedback>;

    /// Number of envelopes waiting for this process.
    fn pending_count(&self) -> Result<usize, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Type and sender of the next waiting envelope, without removing it.
    fn peek_envelope(&self) -> Result<Option<(u32, Pid)>, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Drop every envelope waiting for this process.
    fn clear_pending(&self) -> Result<(), KernelError> {
        Err(KernelError::NotSupported)
    }

    // === Process Protection ===

    /// Mark every child of the calling process as independent, so the
    /// kernel does not reclaim them when the caller exits.
    ///
    /// With `emergency_ok`, the kernel may still kill them in an emergency.
    fn set_do_not_kill(&self, emergency_ok: bool) -> Result<(), KernelError>;

    // === Capability Authority ===

    /// Ask the grant authority for a token. `None` when policy refuses.
    fn acquire_capability(
        &self,
        capabilities: u32,
        description: &str,
        timeout_sec: u32,
    ) -> Option<CapabilityToken>;

    /// Return a token to the grant authority.
    fn release_capability(&self, token: &CapabilityToken) -> Result<(), KernelError>;

    /// Extend a token's validity; returns the new `valid_until`.
    fn renew_capability(
        &self,
        _token: &CapabilityToken,
        _add_time_sec: u32,
    ) -> Result<u64, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Tokens the grant authority currently tracks for `pid`.
    fn capabilities_of(&self, pid: Pid) -> Vec<CapabilityToken>;

    /// Place a token on the virtual port for another process to claim.
    fn send_virtual_port(&self, _token: &CapabilityToken) -> Result<(), KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Claim the next token waiting on the virtual port.
    fn receive_virtual_port(&self) -> Result<Option<CapabilityToken>, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Drop every token this process left on the virtual port.
    fn clear_virtual_port(&self) -> Result<(), KernelError> {
        Err(KernelError::NotSupported)
    }

    // === Power ===

    /// Privileged shutdown call.
    fn shutdown(&self, reason: u32, flags: u32, message: &str) -> Result<(), KernelError>;

    /// Privileged reboot call.
    fn reboot(&self, reason: u32, flags: u32, message: &str) -> Result<(), KernelError>;

    /// Current power state.
    fn shutdown_status(&self) -> Result<PowerState, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Abort a pending (graceful) shutdown.
    fn cancel_shutdown(&self) -> Result<(), KernelError> {
        Err(KernelError::NotSupported)
    }
}

/// Why the kernel refused an envelope at the send step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFault {
    /// Receiver endpoint does not exist
    InvalidEndpoint,
    /// Receiver's queue is full
    QueueFull,
    /// IPC service not running (or any other kernel-side failure)
    Unavailable,
}

impl fmt::Display for SendFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFault::InvalidEndpoint => write!(f, "invalid endpoint"),
            SendFault::QueueFull => write!(f, "receiver queue full"),
            SendFault::Unavailable => write!(f, "IPC service unavailable"),
        }
    }
}

/// Kernel errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Caller lacks the permission for this call
    PermissionDenied,
    /// Kernel-side service not running
    Unavailable,
    /// Object (token, process) not found
    NotFound,
    /// Invalid argument
    InvalidArgument,
    /// Not enough memory available
    OutOfMemory,
    /// Operation not supported on this platform
    NotSupported,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::PermissionDenied => write!(f, "permission denied"),
            KernelError::Unavailable => write!(f, "kernel service unavailable"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::NotSupported => write!(f, "not supported"),
        }
    }
}

/// Power state reported by `Kernel::shutdown_status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// System running normally
    Running,
    /// Shutdown requested, grace period in progress
    ShuttingDown,
    /// Reboot requested, grace period in progress
    Rebooting,
}

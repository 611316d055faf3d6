//! Process-side IPC library for E-comOS
//!
//! Every privileged operation in E-comOS lives in a separate service
//! process; ordinary programs reach those services only through this crate.
//!
//! # Components
//!
//! - [`IpcContext`] - per-process state: sequence counter, sent-message
//!   ledger, local inbox. Provides the transport (`send`, `receive`,
//!   `broadcast`) and the synchronous `call` protocol.
//! - [`ServiceDirectory`] - name → pid resolution via the directory process
//! - [`CapabilityManager`] - time-boxed, ownership-checked capability tokens
//! - [`ShutdownCoordinator`] - capability-gated shutdown / reboot, shutdown
//!   callbacks and the Appendix-S save handshake
//!
//! # Locking
//!
//! The ledger, the sequence counter and the inbox share one `spin::Mutex`.
//! It is held only to allocate a sequence, insert a record or mutate one;
//! never across a kernel call, the blocking receive, or a poll sleep.
//!
//! # Example
//!
//! ```ignore
//! let ctx = IpcContext::new(kernel, IpcConfig::default());
//! let pid = ctx.directory().lookup("vfs")?;
//! let reply = ctx.call(pid, 0x8000, b"stat /", 1000)?;
//! ```

#![no_std]
extern crate alloc;

mod call;
mod capability;
mod config;
mod directory;
mod error;
mod ledger;
mod shutdown;
mod transport;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;

pub use capability::{token_is_valid, CapabilityManager};
pub use config::*;
pub use directory::{
    LookupRequest, LookupResponse, RegisterRequest, ServiceDirectory, StatusResponse,
    UnregisterRequest,
};
pub use error::IpcError;
pub use ledger::{Advance, DeliveryState, Ledger, SentRecord};
pub use shutdown::{ShutdownCoordinator, ShutdownHandler, ShutdownNotice};

// Re-export the wire vocabulary so callers need a single dependency.
pub use ecos_hal::{Kernel, KernelError, PowerState, SendFault};
pub use ecos_ipc::{
    capability as caps, msg, shutdown_flags, CapabilityToken, Envelope, Feedback, Pid, Sequence,
    ShutdownReason, BROADCAST_PID, MAX_PAYLOAD_LEN, MAX_VALID_PID,
};

use alloc::string::String;
use spin::Mutex;

use ledger::ProcessState;

/// Per-process IPC state.
///
/// Constructed once per process and shared (by reference) with every
/// component that needs it. Dropping it discards all ledger records.
pub struct IpcContext<K: Kernel> {
    kernel: K,
    config: IpcConfig,
    state: Mutex<ProcessState>,
}

impl<K: Kernel> IpcContext<K> {
    pub fn new(kernel: K, config: IpcConfig) -> Self {
        let state = ProcessState::new(config.ledger_capacity, config.inbox_capacity);
        let ctx = Self {
            kernel,
            config,
            state: Mutex::new(state),
        };
        ctx.log(&alloc::format!(
            "init pid={} ledger={} inbox={}",
            ctx.pid(),
            ctx.config.ledger_capacity,
            ctx.config.inbox_capacity
        ));
        ctx
    }

    /// PID of this process.
    pub fn pid(&self) -> Pid {
        self.kernel.current_pid()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    /// Service directory client.
    pub fn directory(&self) -> ServiceDirectory<'_, K> {
        ServiceDirectory::new(self)
    }

    /// Capability manager.
    pub fn capabilities(&self) -> CapabilityManager<'_, K> {
        CapabilityManager::new(self)
    }

    /// Number of records currently held by the ledger.
    pub fn ledger_len(&self) -> usize {
        self.state.lock().ledger.len()
    }

    /// Snapshot of a ledger record.
    pub fn record(&self, seq: Sequence) -> Option<SentRecord> {
        self.state.lock().ledger.get(seq).cloned()
    }

    /// Discard every ledger record and queued local notice.
    pub fn shutdown_ledger(&self) {
        let mut state = self.state.lock();
        state.ledger.clear();
        state.inbox.clear();
    }

    /// Write a debug line through the kernel.
    pub(crate) fn log(&self, msg: &str) {
        let mut line = String::with_capacity(msg.len() + 8);
        line.push_str("[eclib] ");
        line.push_str(msg);
        self.kernel.debug_write(&line);
    }
}

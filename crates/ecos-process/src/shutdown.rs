//! Shutdown coordination
//!
//! - Capability-gated shutdown and reboot, announced by broadcast
//! - Shutdown callback table
//! - Appendix-S: child protection and the save-state handshake with the
//!   power manager

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use ecos_hal::{Kernel, PowerState};
use ecos_ipc::{
    capability, msg, notice, shutdown_flags, Envelope, Pid, ShutdownReason,
    MAX_SHUTDOWN_MESSAGE_LEN,
};

use crate::capability::truncate;
use crate::error::IpcError;
use crate::ledger::DeliveryState;
use crate::IpcContext;

const DEFAULT_SHUTDOWN_MESSAGE: &str = "System shutdown requested";
const DEFAULT_REBOOT_MESSAGE: &str = "System reboot requested";

/// Receives shutdown announcements.
pub trait ShutdownHandler: Send + Sync {
    /// Called once per announcement, with the `user_data` given at
    /// registration.
    fn on_shutdown(&self, notice: &ShutdownNotice, user_data: u64);
}

/// A parsed shutdown / reboot announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownNotice {
    pub reboot: bool,
    pub reason: ShutdownReason,
    pub message: String,
    pub flags: u32,
    pub sender: Pid,
}

impl ShutdownNotice {
    /// Wire payload: `SHUTDOWN:reason=<n>:message=<text>` (or `REBOOT:`).
    pub fn encode(&self) -> String {
        let prefix = if self.reboot {
            notice::REBOOT
        } else {
            notice::SHUTDOWN
        };
        format!(
            "{}reason={}:message={}",
            prefix, self.reason as u32, self.message
        )
    }

    /// Parse a received announcement. `None` if `envelope` is not one.
    pub fn parse(envelope: &Envelope) -> Option<Self> {
        if envelope.message_id != msg::IPC_MSG_SHUTDOWN_REQUEST {
            return None;
        }
        let text = envelope.payload_str()?;
        let (reboot, rest) = if let Some(rest) = text.strip_prefix(notice::SHUTDOWN) {
            (false, rest)
        } else {
            (true, text.strip_prefix(notice::REBOOT)?)
        };
        let rest = rest.strip_prefix("reason=")?;
        let (reason, message) = rest.split_once(":message=")?;
        let reason = ShutdownReason::from_u32(reason.parse().ok()?)?;

        Some(Self {
            reboot,
            reason,
            message: String::from(message),
            flags: envelope.flags,
            sender: envelope.sender_pid,
        })
    }
}

struct Registration {
    handler: Arc<dyn ShutdownHandler>,
    user_data: u64,
}

/// Shutdown, reboot and Appendix-S for one process.
pub struct ShutdownCoordinator<'a, K: Kernel> {
    ctx: &'a IpcContext<K>,
    callbacks: Mutex<Vec<Registration>>,
    /// Appendix-S grace deadline (monotonic ms), while a save is in progress
    save_deadline: Mutex<Option<u64>>,
}

impl<'a, K: Kernel> ShutdownCoordinator<'a, K> {
    pub fn new(ctx: &'a IpcContext<K>) -> Self {
        Self {
            ctx,
            callbacks: Mutex::new(Vec::with_capacity(ctx.config().callback_capacity)),
            save_deadline: Mutex::new(None),
        }
    }

    // ========================================================================
    // Shutdown / Reboot
    // ========================================================================

    /// Power off. Requires `capability::SHUTDOWN`.
    ///
    /// Unless `NOWAIT` is set, every process is told first.
    pub fn shutdown(
        &self,
        reason: ShutdownReason,
        flags: u32,
        message: &str,
    ) -> Result<(), IpcError> {
        self.power_off(false, reason, flags, message)
    }

    /// Reboot. Requires `capability::REBOOT`.
    pub fn reboot(&self, reason: ShutdownReason, flags: u32, message: &str) -> Result<(), IpcError> {
        self.power_off(true, reason, flags, message)
    }

    fn power_off(
        &self,
        reboot: bool,
        reason: ShutdownReason,
        flags: u32,
        message: &str,
    ) -> Result<(), IpcError> {
        let (required, verb) = if reboot {
            (capability::REBOOT, "reboot")
        } else {
            (capability::SHUTDOWN, "shutdown")
        };

        if !self.ctx.capabilities().check(required) {
            self.log(flags, &format!("{}: denied, capability missing", verb));
            return Err(IpcError::PermissionDenied);
        }

        let message = match message {
            "" if reboot => DEFAULT_REBOOT_MESSAGE,
            "" => DEFAULT_SHUTDOWN_MESSAGE,
            m => truncate(m, MAX_SHUTDOWN_MESSAGE_LEN),
        };

        if flags & shutdown_flags::NOWAIT == 0 {
            let announcement = ShutdownNotice {
                reboot,
                reason,
                message: String::from(message),
                flags,
                sender: self.ctx.pid(),
            };
            let payload = announcement.encode();
            if let Err(e) =
                self.ctx
                    .broadcast(msg::IPC_MSG_SHUTDOWN_REQUEST, flags, payload.as_bytes())
            {
                self.log(flags, &format!("{}: announcement failed: {}", verb, e));
            }
        }

        self.log(
            flags,
            &format!(
                "{}: reason={} flags=0x{:x} message={}",
                verb,
                reason.name(),
                flags,
                message
            ),
        );

        let kernel = self.ctx.kernel();
        if reboot {
            kernel.reboot(reason as u32, flags, message)?;
        } else {
            kernel.shutdown(reason as u32, flags, message)?;
        }
        Ok(())
    }

    /// Current power state.
    pub fn shutdown_status(&self) -> Result<PowerState, IpcError> {
        Ok(self.ctx.kernel().shutdown_status()?)
    }

    /// Abort a pending shutdown. Requires `capability::SHUTDOWN`.
    pub fn cancel_shutdown(&self) -> Result<(), IpcError> {
        if !self.ctx.capabilities().check(capability::SHUTDOWN) {
            return Err(IpcError::PermissionDenied);
        }
        self.ctx.kernel().cancel_shutdown()?;
        self.ctx.log("shutdown: cancelled");
        Ok(())
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Register `handler` for shutdown announcements.
    ///
    /// # Returns
    /// * `Err(AlreadyRegistered)` - This handler is already in the table
    /// * `Err(ResourceLimit)` - Table full
    pub fn register_shutdown_callback(
        &self,
        handler: Arc<dyn ShutdownHandler>,
        user_data: u64,
    ) -> Result<(), IpcError> {
        let mut callbacks = self.callbacks.lock();
        if callbacks.iter().any(|r| Arc::ptr_eq(&r.handler, &handler)) {
            return Err(IpcError::AlreadyRegistered);
        }
        if callbacks.len() >= self.ctx.config().callback_capacity {
            return Err(IpcError::ResourceLimit);
        }
        callbacks.push(Registration { handler, user_data });
        Ok(())
    }

    /// Remove `handler` from the table.
    pub fn unregister_shutdown_callback(
        &self,
        handler: &Arc<dyn ShutdownHandler>,
    ) -> Result<(), IpcError> {
        let mut callbacks = self.callbacks.lock();
        let idx = callbacks
            .iter()
            .position(|r| Arc::ptr_eq(&r.handler, handler))
            .ok_or(IpcError::NotFound)?;
        callbacks.remove(idx);
        Ok(())
    }

    /// Number of registered handlers.
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Run every registered handler for a received announcement.
    ///
    /// Returns how many handlers ran. Handlers run without the table lock.
    pub fn dispatch_notice(&self, envelope: &Envelope) -> Result<usize, IpcError> {
        let notice = ShutdownNotice::parse(envelope).ok_or(IpcError::InvalidParameter)?;
        let targets: Vec<(Arc<dyn ShutdownHandler>, u64)> = self
            .callbacks
            .lock()
            .iter()
            .map(|r| (Arc::clone(&r.handler), r.user_data))
            .collect();

        for (handler, user_data) in &targets {
            handler.on_shutdown(&notice, *user_data);
        }
        Ok(targets.len())
    }

    // ========================================================================
    // Appendix S
    // ========================================================================

    /// Protect this process's children from reclamation when it exits.
    pub fn do_not_kill_children(&self) -> Result<(), IpcError> {
        self.request_exemption(false, self.ctx.config().exemption_retries)
    }

    /// Like `do_not_kill_children`, but the kernel may still kill them in
    /// an emergency.
    pub fn do_not_kill_children_emergency_ok(&self) -> Result<(), IpcError> {
        self.request_exemption(true, self.ctx.config().exemption_retries)
    }

    /// Request the exemption with a caller-chosen wait budget.
    pub fn request_shutdown_exemption(&self, timeout_ms: u32) -> Result<(), IpcError> {
        let interval = self.ctx.config().exemption_poll_ms.max(1);
        self.request_exemption(false, (timeout_ms / interval).max(1))
    }

    // Granted once the kernel has taken the request (`Sent` or later).
    fn request_exemption(&self, emergency_ok: bool, retries: u32) -> Result<(), IpcError> {
        let ctx = self.ctx;
        let pid = ctx.pid();
        ctx.kernel().set_do_not_kill(emergency_ok)?;

        let seq = ctx.send(
            ctx.config().kernel_pid,
            msg::IPC_MSG_DO_NOT_KILL,
            &pid.to_le_bytes(),
            true,
        )?;

        let prefix = if emergency_ok {
            notice::DO_NOT_KILL_EMERGENCY
        } else {
            notice::DO_NOT_KILL
        };
        let announcement = format!("{}{}", prefix, pid);
        if let Err(e) = ctx.broadcast(msg::IPC_MSG_DO_NOT_KILL, 0, announcement.as_bytes()) {
            ctx.log(&format!("do-not-kill: announcement failed: {}", e));
        }

        for _ in 0..retries {
            let state = ctx.state(seq);
            match state {
                DeliveryState::Sent
                | DeliveryState::Delivered
                | DeliveryState::Received
                | DeliveryState::Unknown => {
                    ctx.forget(seq);
                    ctx.log(&format!(
                        "do-not-kill: granted pid={} emergency_ok={}",
                        pid, emergency_ok
                    ));
                    return Ok(());
                }
                s if s.is_failure() => {
                    ctx.forget(seq);
                    ctx.log(&format!("do-not-kill: refused state={}", s.name()));
                    return Err(match s {
                        DeliveryState::PermissionDenied => IpcError::PermissionDenied,
                        _ => IpcError::ServiceUnavailable,
                    });
                }
                _ => {}
            }
            ctx.kernel().sleep_ms(ctx.config().exemption_poll_ms);
        }

        ctx.forget(seq);
        ctx.log(&format!("do-not-kill: no answer after {} polls", retries));
        Err(IpcError::Timeout)
    }

    /// Start saving state before power-off.
    ///
    /// Obtains the do-not-kill exemption (hard failure if refused), tells the
    /// power manager to wait, and opens the grace window.
    pub fn begin_save(&self) -> Result<(), IpcError> {
        self.do_not_kill_children()?;

        let ctx = self.ctx;
        ctx.send(
            ctx.config().power_manager_pid,
            msg::IPC_MSG_APPENDIX_S_WAIT,
            notice::WAIT.as_bytes(),
            false,
        )?;

        let deadline = ctx.kernel().now_ms() + ctx.config().save_grace_ms;
        *self.save_deadline.lock() = Some(deadline);
        ctx.log(&format!(
            "appendix-s: save started grace={}ms",
            ctx.config().save_grace_ms
        ));
        Ok(())
    }

    /// Tell the power manager the save is done and close the grace window.
    pub fn save_complete(&self) -> Result<(), IpcError> {
        let ctx = self.ctx;
        ctx.send(
            ctx.config().power_manager_pid,
            msg::IPC_MSG_APPENDIX_S_OKTHANKS,
            notice::OKTHANKS.as_bytes(),
            false,
        )?;
        *self.save_deadline.lock() = None;
        ctx.log("appendix-s: save complete");
        Ok(())
    }

    /// Milliseconds of grace left (0 when no save is in progress).
    pub fn get_remaining_time(&self) -> u64 {
        let deadline = *self.save_deadline.lock();
        deadline
            .map(|d| d.saturating_sub(self.ctx.kernel().now_ms()))
            .unwrap_or(0)
    }

    /// Whether an Appendix-S save is in progress.
    pub fn is_saving(&self) -> bool {
        self.save_deadline.lock().is_some()
    }

    fn log(&self, flags: u32, msg: &str) {
        if flags & shutdown_flags::NOLOG == 0 {
            self.ctx.log(msg);
        }
    }
}

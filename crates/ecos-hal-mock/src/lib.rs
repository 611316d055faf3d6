//! Mock kernel implementation for testing E-comOS processes
//!
//! `MockWorld` simulates the kernel side of a small multi-process system:
//! mailboxes, scripted delivery feedback, the capability grant authority,
//! the virtual port and power control. Each simulated process talks to the
//! world through its own `MockKernel`, which implements the `Kernel` trait.
//!
//! Time is simulated: `sleep_ms` advances the shared clock instead of
//! blocking, so poll loops run instantly and deterministically.

#![no_std]
extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use ecos_hal::{Kernel, KernelError, PowerState, SendFault};
use ecos_ipc::{CapabilityToken, Envelope, Feedback, Pid, Sequence};

/// Starting wall clock (2025-01-22T00:00:00Z), seconds
pub const MOCK_WALLCLOCK_SECS: u64 = 1_737_504_000;

/// Computes the feedback script for an envelope sent to a peer.
pub type Responder = Arc<dyn Fn(&Envelope) -> Vec<Feedback> + Send + Sync>;

/// Which privileged power call a process made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerCallKind {
    Shutdown,
    Reboot,
}

/// A recorded shutdown / reboot call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PowerCall {
    pub caller: Pid,
    pub kind: PowerCallKind,
    pub reason: u32,
    pub flags: u32,
    pub message: String,
}

/// A recorded `send_envelope` call.
#[derive(Clone, Debug)]
pub struct SendCall {
    pub envelope: Envelope,
    pub need_feedback: bool,
    pub seq: Sequence,
}

/// Grant authority behavior.
#[derive(Clone, Debug, Default)]
struct GrantPolicy {
    /// Refuse every grant
    deny: bool,
    /// Forge the returned token's owner (simulates a compromised authority)
    forged_owner: Option<Pid>,
}

#[derive(Default)]
struct WorldState {
    mailboxes: BTreeMap<Pid, VecDeque<Envelope>>,
    sent: Vec<SendCall>,
    broadcasts: Vec<Envelope>,
    feedback: BTreeMap<(Pid, Sequence), VecDeque<Feedback>>,
    responders: BTreeMap<Pid, Responder>,
    send_faults: BTreeMap<Pid, SendFault>,
    broadcast_fault: Option<SendFault>,
    grants: BTreeMap<Pid, Vec<CapabilityToken>>,
    grant_policy: GrantPolicy,
    virtual_port: VecDeque<CapabilityToken>,
    do_not_kill: BTreeMap<Pid, bool>,
    do_not_kill_fault: Option<KernelError>,
    power_calls: Vec<PowerCall>,
    power_state: Option<PowerState>,
    debug_log: Vec<String>,
}

/// Shared kernel-side state for every simulated process.
pub struct MockWorld {
    /// Simulated monotonic clock in milliseconds
    clock_ms: AtomicU64,
    /// Simulated wall clock in seconds
    wallclock_secs: AtomicU64,
    /// Next capability token id
    next_token_id: AtomicU64,
    state: Mutex<WorldState>,
}

impl MockWorld {
    /// Create a new world with the clock at zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock_ms: AtomicU64::new(0),
            wallclock_secs: AtomicU64::new(MOCK_WALLCLOCK_SECS),
            next_token_id: AtomicU64::new(1),
            state: Mutex::new(WorldState::default()),
        })
    }

    /// Handle through which process `pid` reaches the kernel.
    ///
    /// The process gets a mailbox, so it receives broadcasts from then on.
    pub fn process(self: &Arc<Self>, pid: Pid) -> MockKernel {
        self.state.lock().mailboxes.entry(pid).or_default();
        MockKernel {
            world: Arc::clone(self),
            pid,
        }
    }

    // === Clock ===

    /// Advance the monotonic clock.
    pub fn advance_ms(&self, ms: u64) {
        self.clock_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Current monotonic clock.
    pub fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::SeqCst)
    }

    /// Advance the wall clock (token expiry).
    pub fn advance_wallclock(&self, secs: u64) {
        self.wallclock_secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Current wall clock.
    pub fn wallclock_secs(&self) -> u64 {
        self.wallclock_secs.load(Ordering::SeqCst)
    }

    // === Peer scripting ===

    /// Install a responder for envelopes sent to `pid`.
    pub fn on_message<F>(&self, pid: Pid, responder: F)
    where
        F: Fn(&Envelope) -> Vec<Feedback> + Send + Sync + 'static,
    {
        self.state.lock().responders.insert(pid, Arc::new(responder));
    }

    /// `pid` answers every request with `response`.
    pub fn reply_with(&self, pid: Pid, response: Vec<u8>) {
        self.on_message(pid, move |_| {
            vec![
                Feedback::Sending,
                Feedback::Delivered,
                Feedback::Received(response.clone()),
            ]
        });
    }

    /// `pid` accepts envelopes but never reports progress.
    pub fn silence(&self, pid: Pid) {
        self.on_message(pid, |_| Vec::new());
    }

    /// The kernel rejects sends to `pid` at the send step.
    pub fn fail_sends_to(&self, pid: Pid, fault: SendFault) {
        self.state.lock().send_faults.insert(pid, fault);
    }

    /// The kernel rejects broadcasts.
    pub fn fail_broadcasts(&self, fault: SendFault) {
        self.state.lock().broadcast_fault = Some(fault);
    }

    /// Push an envelope into `pid`'s mailbox.
    pub fn deliver(&self, pid: Pid, envelope: Envelope) {
        self.state
            .lock()
            .mailboxes
            .entry(pid)
            .or_default()
            .push_back(envelope);
    }

    // === Grant authority ===

    /// Refuse every capability grant.
    pub fn deny_grants(&self) {
        self.state.lock().grant_policy.deny = true;
    }

    /// Return tokens whose `owner_pid` is forged to `pid`.
    pub fn forge_grant_owner(&self, pid: Pid) {
        self.state.lock().grant_policy.forged_owner = Some(pid);
    }

    /// Tokens tracked for `pid`.
    pub fn grants_of(&self, pid: Pid) -> Vec<CapabilityToken> {
        self.state.lock().grants.get(&pid).cloned().unwrap_or_default()
    }

    /// Tokens waiting on the virtual port.
    pub fn virtual_port_len(&self) -> usize {
        self.state.lock().virtual_port.len()
    }

    /// Fail the next do-not-kill syscalls.
    pub fn fail_do_not_kill(&self, err: KernelError) {
        self.state.lock().do_not_kill_fault = Some(err);
    }

    /// Whether `pid` protected its children (and the emergency flag).
    pub fn do_not_kill_of(&self, pid: Pid) -> Option<bool> {
        self.state.lock().do_not_kill.get(&pid).copied()
    }

    // === Inspection ===

    /// Every `send_envelope` call accepted or rejected so far.
    pub fn sent(&self) -> Vec<SendCall> {
        self.state.lock().sent.clone()
    }

    /// Envelopes sent to `pid`.
    pub fn sent_to(&self, pid: Pid) -> Vec<Envelope> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|r| r.envelope.receiver_pid == pid)
            .map(|r| r.envelope.clone())
            .collect()
    }

    /// Number of `send_envelope` calls.
    pub fn send_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Every broadcast accepted so far.
    pub fn broadcasts(&self) -> Vec<Envelope> {
        self.state.lock().broadcasts.clone()
    }

    /// Every privileged power call.
    pub fn power_calls(&self) -> Vec<PowerCall> {
        self.state.lock().power_calls.clone()
    }

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.state.lock().debug_log.clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.state
            .lock()
            .debug_log
            .iter()
            .any(|msg| msg.contains(substr))
    }
}

/// One simulated process's view of the kernel.
#[derive(Clone)]
pub struct MockKernel {
    world: Arc<MockWorld>,
    pid: Pid,
}

impl MockKernel {
    /// The shared world.
    pub fn world(&self) -> &Arc<MockWorld> {
        &self.world
    }

    fn default_feedback() -> Vec<Feedback> {
        vec![Feedback::Delivered, Feedback::Received(Vec::new())]
    }
}

impl Kernel for MockKernel {
    fn current_pid(&self) -> Pid {
        self.pid
    }

    fn now_ms(&self) -> u64 {
        self.world.now_ms()
    }

    fn wallclock_secs(&self) -> u64 {
        self.world.wallclock_secs()
    }

    fn sleep_ms(&self, ms: u32) {
        self.world.advance_ms(ms as u64);
    }

    fn debug_write(&self, msg: &str) {
        self.world.state.lock().debug_log.push(String::from(msg));
    }

    fn send_envelope(
        &self,
        envelope: &Envelope,
        need_feedback: bool,
        seq: Sequence,
    ) -> Result<(), SendFault> {
        let receiver = envelope.receiver_pid;
        let (fault, responder) = {
            let mut state = self.world.state.lock();
            state.sent.push(SendCall {
                envelope: envelope.clone(),
                need_feedback,
                seq,
            });
            (
                state.send_faults.get(&receiver).copied(),
                state.responders.get(&receiver).cloned(),
            )
        };
        if let Some(fault) = fault {
            return Err(fault);
        }

        // Responder runs without the world lock held.
        let script = match responder {
            Some(responder) => responder(envelope),
            None => Self::default_feedback(),
        };

        let mut state = self.world.state.lock();
        state
            .mailboxes
            .entry(receiver)
            .or_default()
            .push_back(envelope.clone());
        if need_feedback {
            state
                .feedback
                .insert((self.pid, seq), script.into_iter().collect());
        }
        Ok(())
    }

    fn broadcast_envelope(&self, envelope: &Envelope) -> Result<(), SendFault> {
        let mut state = self.world.state.lock();
        if let Some(fault) = state.broadcast_fault {
            return Err(fault);
        }
        state.broadcasts.push(envelope.clone());
        let sender = self.pid;
        for (pid, mailbox) in state.mailboxes.iter_mut() {
            if *pid != sender {
                mailbox.push_back(envelope.clone());
            }
        }
        Ok(())
    }

    fn receive_envelope(&self, timeout_ms: u32) -> Result<Option<Envelope>, KernelError> {
        loop {
            if let Some(env) = self
                .world
                .state
                .lock()
                .mailboxes
                .get_mut(&self.pid)
                .and_then(|m| m.pop_front())
            {
                return Ok(Some(env));
            }
            if timeout_ms != 0 {
                self.world.advance_ms(timeout_ms as u64);
                return Ok(None);
            }
            core::hint::spin_loop();
        }
    }

    fn delivery_feedback(&self, seq: Sequence) -> Option<Feedback> {
        self.world
            .state
            .lock()
            .feedback
            .get_mut(&(self.pid, seq))
            .and_then(|script| script.pop_front())
    }

    fn pending_count(&self) -> Result<usize, KernelError> {
        Ok(self
            .world
            .state
            .lock()
            .mailboxes
            .get(&self.pid)
            .map(|m| m.len())
            .unwrap_or(0))
    }

    fn peek_envelope(&self) -> Result<Option<(u32, Pid)>, KernelError> {
        Ok(self
            .world
            .state
            .lock()
            .mailboxes
            .get(&self.pid)
            .and_then(|m| m.front())
            .map(|e| (e.message_id, e.sender_pid)))
    }

    fn clear_pending(&self) -> Result<(), KernelError> {
        if let Some(m) = self.world.state.lock().mailboxes.get_mut(&self.pid) {
            m.clear();
        }
        Ok(())
    }

    fn set_do_not_kill(&self, emergency_ok: bool) -> Result<(), KernelError> {
        let mut state = self.world.state.lock();
        if let Some(err) = state.do_not_kill_fault {
            return Err(err);
        }
        state.do_not_kill.insert(self.pid, emergency_ok);
        Ok(())
    }

    fn acquire_capability(
        &self,
        capabilities: u32,
        description: &str,
        timeout_sec: u32,
    ) -> Option<CapabilityToken> {
        let mut state = self.world.state.lock();
        if state.grant_policy.deny {
            return None;
        }
        let id = self.world.next_token_id.fetch_add(1, Ordering::SeqCst);
        let token = CapabilityToken {
            id,
            capabilities,
            owner_pid: self.pid,
            valid_until: self.world.wallclock_secs() + timeout_sec as u64,
            description: String::from(description),
        };
        state.grants.entry(self.pid).or_default().push(token.clone());

        let mut returned = token;
        if let Some(forged) = state.grant_policy.forged_owner {
            returned.owner_pid = forged;
        }
        Some(returned)
    }

    fn release_capability(&self, token: &CapabilityToken) -> Result<(), KernelError> {
        let mut state = self.world.state.lock();
        let grants = state.grants.get_mut(&self.pid).ok_or(KernelError::NotFound)?;
        let before = grants.len();
        grants.retain(|t| t.id != token.id);
        if grants.len() == before {
            return Err(KernelError::NotFound);
        }
        Ok(())
    }

    fn renew_capability(
        &self,
        token: &CapabilityToken,
        add_time_sec: u32,
    ) -> Result<u64, KernelError> {
        let mut state = self.world.state.lock();
        let tracked = state
            .grants
            .get_mut(&self.pid)
            .and_then(|g| g.iter_mut().find(|t| t.id == token.id))
            .ok_or(KernelError::NotFound)?;
        tracked.valid_until += add_time_sec as u64;
        Ok(tracked.valid_until)
    }

    fn capabilities_of(&self, pid: Pid) -> Vec<CapabilityToken> {
        self.world.grants_of(pid)
    }

    fn send_virtual_port(&self, token: &CapabilityToken) -> Result<(), KernelError> {
        self.world.state.lock().virtual_port.push_back(token.clone());
        Ok(())
    }

    fn receive_virtual_port(&self) -> Result<Option<CapabilityToken>, KernelError> {
        Ok(self.world.state.lock().virtual_port.pop_front())
    }

    fn clear_virtual_port(&self) -> Result<(), KernelError> {
        let pid = self.pid;
        self.world
            .state
            .lock()
            .virtual_port
            .retain(|t| t.owner_pid != pid);
        Ok(())
    }

    fn shutdown(&self, reason: u32, flags: u32, message: &str) -> Result<(), KernelError> {
        let mut state = self.world.state.lock();
        state.power_calls.push(PowerCall {
            caller: self.pid,
            kind: PowerCallKind::Shutdown,
            reason,
            flags,
            message: String::from(message),
        });
        state.power_state = Some(PowerState::ShuttingDown);
        Ok(())
    }

    fn reboot(&self, reason: u32, flags: u32, message: &str) -> Result<(), KernelError> {
        let mut state = self.world.state.lock();
        state.power_calls.push(PowerCall {
            caller: self.pid,
            kind: PowerCallKind::Reboot,
            reason,
            flags,
            message: String::from(message),
        });
        state.power_state = Some(PowerState::Rebooting);
        Ok(())
    }

    fn shutdown_status(&self) -> Result<PowerState, KernelError> {
        Ok(self
            .world
            .state
            .lock()
            .power_state
            .unwrap_or(PowerState::Running))
    }

    fn cancel_shutdown(&self) -> Result<(), KernelError> {
        let mut state = self.world.state.lock();
        match state.power_state {
            Some(PowerState::ShuttingDown) | Some(PowerState::Rebooting) => {
                state.power_state = Some(PowerState::Running);
                Ok(())
            }
            _ => Err(KernelError::NotFound),
        }
    }
}

//! Capability tokens
//!
//! Tokens are time-boxed grants for privileged operations. A token is only
//! usable by its `owner_pid`; every check here runs against the caller's
//! pid and the current wall clock. Tokens are caller-owned values: two
//! threads must not mutate the same token without their own
//! synchronization.

use alloc::format;
use alloc::string::String;

use ecos_hal::Kernel;
use ecos_ipc::{CapabilityToken, Pid, MAX_DESCRIPTION_LEN};

use crate::error::IpcError;
use crate::IpcContext;

/// Whether `token` grants `required` to `caller` at `now_secs`.
///
/// Pure predicate: owner matches, token non-empty, not expired, every
/// required bit present.
pub fn token_is_valid(token: &CapabilityToken, required: u32, caller: Pid, now_secs: u64) -> bool {
    !token.is_empty()
        && token.owner_pid == caller
        && !token.is_expired(now_secs)
        && token.covers(required)
}

/// Capability operations for one process.
pub struct CapabilityManager<'a, K: Kernel> {
    ctx: &'a IpcContext<K>,
}

impl<'a, K: Kernel> CapabilityManager<'a, K> {
    pub fn new(ctx: &'a IpcContext<K>) -> Self {
        Self { ctx }
    }

    /// Ask the grant authority for `capabilities`, valid for `timeout_sec`.
    ///
    /// Over-long descriptions are truncated. The returned token is always
    /// owned by the caller, whatever the authority reported.
    pub fn acquire(
        &self,
        capabilities: u32,
        description: &str,
        timeout_sec: u32,
    ) -> Option<CapabilityToken> {
        let description = truncate(description, MAX_DESCRIPTION_LEN);
        let kernel = self.ctx.kernel();

        let Some(mut token) = kernel.acquire_capability(capabilities, description, timeout_sec)
        else {
            self.ctx.log(&format!(
                "cap: grant refused caps=0x{:x} desc={}",
                capabilities, description
            ));
            return None;
        };

        let caller = self.ctx.pid();
        if token.owner_pid != caller {
            self.ctx.log(&format!(
                "cap: authority reported owner={} for caller={}, overriding",
                token.owner_pid, caller
            ));
        }
        token.owner_pid = caller;
        token.description = String::from(truncate(&token.description, MAX_DESCRIPTION_LEN));
        Some(token)
    }

    /// Return `token` to the grant authority and wipe it.
    ///
    /// Fails with `NotOwner` if the caller does not own it. The token is
    /// only wiped once the authority accepts the release.
    pub fn release(&self, token: &mut CapabilityToken) -> Result<(), IpcError> {
        if token.owner_pid != self.ctx.pid() {
            return Err(IpcError::NotOwner);
        }
        self.ctx.kernel().release_capability(token)?;
        wipe(token);
        Ok(())
    }

    /// Pure check of `token` against `required` for the calling process.
    pub fn validate(&self, token: &CapabilityToken, required: u32) -> bool {
        token_is_valid(
            token,
            required,
            self.ctx.pid(),
            self.ctx.kernel().wallclock_secs(),
        )
    }

    /// Whether the calling process currently holds `required`.
    pub fn check(&self, required: u32) -> bool {
        self.check_for_pid(required, self.ctx.pid())
    }

    /// Whether `pid` currently holds `required`, across all of its valid
    /// tokens combined.
    pub fn check_for_pid(&self, required: u32, pid: Pid) -> bool {
        let kernel = self.ctx.kernel();
        let now = kernel.wallclock_secs();
        let held = kernel
            .capabilities_of(pid)
            .iter()
            .filter(|t| token_is_valid(t, 0, pid, now))
            .fold(0u32, |acc, t| acc | t.capabilities);
        held & required == required
    }

    /// Extend `token` by `add_time_sec`.
    pub fn renew(&self, token: &mut CapabilityToken, add_time_sec: u32) -> Result<(), IpcError> {
        if token.owner_pid != self.ctx.pid() {
            return Err(IpcError::NotOwner);
        }
        if token.is_empty() {
            return Err(IpcError::InvalidParameter);
        }
        if token.is_expired(self.ctx.kernel().wallclock_secs()) {
            return Err(IpcError::Expired);
        }
        token.valid_until = self.ctx.kernel().renew_capability(token, add_time_sec)?;
        Ok(())
    }

    /// Hand `token` to the virtual port for another process to claim.
    ///
    /// Ownership and expiry are checked here, at send time.
    pub fn send_to_virtual_port(&self, token: &CapabilityToken) -> Result<(), IpcError> {
        if token.owner_pid != self.ctx.pid() {
            return Err(IpcError::NotOwner);
        }
        if token.is_empty() {
            return Err(IpcError::InvalidParameter);
        }
        if token.is_expired(self.ctx.kernel().wallclock_secs()) {
            return Err(IpcError::Expired);
        }
        self.ctx.kernel().send_virtual_port(token)?;
        self.ctx
            .log(&format!("cap: token id={} sent to virtual port", token.id));
        Ok(())
    }

    /// Claim the next token on the virtual port. Callers must `validate` it.
    pub fn receive_from_virtual_port(&self) -> Result<Option<CapabilityToken>, IpcError> {
        Ok(self.ctx.kernel().receive_virtual_port()?)
    }

    /// Withdraw every token this process left on the virtual port.
    pub fn clear_virtual_port(&self) -> Result<(), IpcError> {
        Ok(self.ctx.kernel().clear_virtual_port()?)
    }
}

/// Longest prefix of `s` within `max` bytes, on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Zero every field, including the description's heap buffer.
fn wipe(token: &mut CapabilityToken) {
    let mut bytes = core::mem::take(&mut token.description).into_bytes();
    bytes.fill(0);
    core::hint::black_box(&bytes);
    *token = CapabilityToken::default();
}


#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: an expired token is never valid, whatever its mask
    #[kani::proof]
    fn expired_token_never_valid() {
        let token = CapabilityToken {
            id: kani::any(),
            capabilities: kani::any(),
            owner_pid: kani::any(),
            valid_until: kani::any(),
            description: String::new(),
        };
        let now: u64 = kani::any();
        kani::assume(now > token.valid_until);

        kani::assert(
            !token_is_valid(&token, kani::any(), token.owner_pid, now),
            "Expired token must not validate",
        );
    }

    /// Proof: no rights escalation - a valid token covers the request
    #[kani::proof]
    fn valid_token_covers_request() {
        let token = CapabilityToken {
            id: kani::any(),
            capabilities: kani::any(),
            owner_pid: kani::any(),
            valid_until: kani::any(),
            description: String::new(),
        };
        let required: u32 = kani::any();
        let caller: Pid = kani::any();
        let now: u64 = kani::any();

        if token_is_valid(&token, required, caller, now) {
            kani::assert(
                token.capabilities & required == required,
                "Valid token must carry every required bit",
            );
            kani::assert(caller == token.owner_pid, "Only the owner validates");
        }
    }
}

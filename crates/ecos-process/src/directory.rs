//! Service directory client
//!
//! Resolves service names to pids through synchronous calls to the
//! directory process. Requests and responses are JSON.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use ecos_hal::Kernel;
use ecos_ipc::directory::{
    SERVICE_CMD_LOOKUP, SERVICE_CMD_REGISTER, SERVICE_CMD_UNREGISTER, STATUS_EXISTS, STATUS_FULL,
    STATUS_NOT_FOUND, STATUS_OK,
};
use ecos_ipc::{msg, notice, Pid, MAX_SERVICE_NAME_LEN};

use crate::error::IpcError;
use crate::IpcContext;

/// Lookup / register call timeout, ms
pub const LOOKUP_TIMEOUT_MS: u32 = 1000;
/// Register call timeout, ms
pub const REGISTER_TIMEOUT_MS: u32 = 1000;
/// Unregister call timeout, ms
pub const UNREGISTER_TIMEOUT_MS: u32 = 500;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Lookup request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub service_name: String,
}

/// Lookup response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// `STATUS_*` code
    pub status: i32,
    /// Service pid (present when `status == STATUS_OK`)
    #[serde(default)]
    pub pid: Option<Pid>,
}

/// Register request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
    pub pid: Pid,
}

/// Unregister request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub service_name: String,
}

/// Register / unregister response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `STATUS_*` code
    pub status: i32,
}

// ============================================================================
// Client
// ============================================================================

/// Name → pid resolution through the directory process.
pub struct ServiceDirectory<'a, K: Kernel> {
    ctx: &'a IpcContext<K>,
}

impl<'a, K: Kernel> ServiceDirectory<'a, K> {
    pub fn new(ctx: &'a IpcContext<K>) -> Self {
        Self { ctx }
    }

    /// Resolve `name`.
    ///
    /// # Returns
    /// * `Ok(pid)` - Service found
    /// * `Err(NotFound)` - Directory answered, name unknown
    /// * `Err(ServiceUnavailable | Timeout)` - Directory unreachable or no answer
    /// * `Err(InvalidParameter)` - Empty or over-long name (no round trip)
    pub fn lookup(&self, name: &str) -> Result<Pid, IpcError> {
        validate_name(name)?;
        let request = LookupRequest {
            service_name: String::from(name),
        };
        let bytes = self.request(SERVICE_CMD_LOOKUP, &request, LOOKUP_TIMEOUT_MS)?;
        if bytes.is_empty() {
            // Untracked call: no answer to read a pid from
            self.ctx.log(&format!("directory: lookup name={} got no answer", name));
            return Err(IpcError::ServiceUnavailable);
        }
        let response: LookupResponse = decode(&bytes)?;
        status_to_result(response.status)?;
        response
            .pid
            .ok_or_else(|| IpcError::Protocol(String::from("lookup response without pid")))
    }

    /// Register `name` → `pid`.
    pub fn register(&self, name: &str, pid: Pid) -> Result<(), IpcError> {
        validate_name(name)?;
        let request = RegisterRequest {
            service_name: String::from(name),
            pid,
        };
        let bytes = self.request(SERVICE_CMD_REGISTER, &request, REGISTER_TIMEOUT_MS)?;
        expect_status(&bytes)?;
        self.ctx
            .log(&format!("directory: registered name={} pid={}", name, pid));
        self.announce(&format!("{}{}:{}", notice::SERVICE_REGISTER, name, pid));
        Ok(())
    }

    /// Register `name` for the calling process.
    pub fn register_self(&self, name: &str) -> Result<(), IpcError> {
        self.register(name, self.ctx.pid())
    }

    /// Remove `name` from the directory.
    pub fn unregister(&self, name: &str) -> Result<(), IpcError> {
        validate_name(name)?;
        let request = UnregisterRequest {
            service_name: String::from(name),
        };
        let bytes = self.request(SERVICE_CMD_UNREGISTER, &request, UNREGISTER_TIMEOUT_MS)?;
        expect_status(&bytes)?;
        self.announce(&format!("{}{}", notice::SERVICE_UNREGISTER, name));
        Ok(())
    }

    /// Broadcast a service up/down notice. Failure is logged only.
    fn announce(&self, text: &str) {
        if let Err(e) = self
            .ctx
            .broadcast(msg::IPC_MSG_SERVICE_NOTICE, 0, text.as_bytes())
        {
            self.ctx
                .log(&format!("directory: notice failed text={} err={}", text, e));
        }
    }

    fn request<T: Serialize>(
        &self,
        command: u32,
        request: &T,
        timeout_ms: u32,
    ) -> Result<Vec<u8>, IpcError> {
        let data = serde_json::to_vec(request)
            .map_err(|e| IpcError::Protocol(format!("Serialize error: {}", e)))?;
        self.ctx
            .call(self.ctx.config().directory_pid, command, &data, timeout_ms)
    }
}

fn validate_name(name: &str) -> Result<(), IpcError> {
    if name.is_empty() || name.len() > MAX_SERVICE_NAME_LEN {
        return Err(IpcError::InvalidParameter);
    }
    Ok(())
}

fn decode<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T, IpcError> {
    serde_json::from_slice(bytes).map_err(|e| IpcError::Protocol(format!("Deserialize error: {}", e)))
}

/// Empty responses come from an `Unknown` call outcome: assume success.
fn expect_status(bytes: &[u8]) -> Result<(), IpcError> {
    if bytes.is_empty() {
        return Ok(());
    }
    let response: StatusResponse = decode(bytes)?;
    status_to_result(response.status)
}

fn status_to_result(status: i32) -> Result<(), IpcError> {
    match status {
        STATUS_OK => Ok(()),
        STATUS_NOT_FOUND => Err(IpcError::NotFound),
        STATUS_EXISTS => Err(IpcError::AlreadyRegistered),
        STATUS_FULL => Err(IpcError::ResourceLimit),
        other => Err(IpcError::Protocol(format!("directory status {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_bounds() {
        assert_eq!(validate_name(""), Err(IpcError::InvalidParameter));
        assert!(validate_name("vfs").is_ok());
        let max = "a".repeat(MAX_SERVICE_NAME_LEN);
        assert!(validate_name(&max).is_ok());
        let over = "a".repeat(MAX_SERVICE_NAME_LEN + 1);
        assert_eq!(validate_name(&over), Err(IpcError::InvalidParameter));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_to_result(STATUS_OK), Ok(()));
        assert_eq!(status_to_result(STATUS_NOT_FOUND), Err(IpcError::NotFound));
        assert_eq!(
            status_to_result(STATUS_EXISTS),
            Err(IpcError::AlreadyRegistered)
        );
        assert_eq!(status_to_result(STATUS_FULL), Err(IpcError::ResourceLimit));
        assert!(matches!(status_to_result(-99), Err(IpcError::Protocol(_))));
    }

    #[test]
    fn test_lookup_response_without_pid_field() {
        let response: LookupResponse = decode(br#"{"status":-2}"#).unwrap();
        assert_eq!(response.status, STATUS_NOT_FOUND);
        assert_eq!(response.pid, None);
    }
}

//! Runtime configuration for an `IpcContext`

use ecos_ipc::{pid, Pid};

/// Sent-message ledger capacity
pub const DEFAULT_LEDGER_CAPACITY: usize = 32;
/// Local inbox capacity (synthesized notices)
pub const DEFAULT_INBOX_CAPACITY: usize = 16;
/// Default per-record timeout in milliseconds
pub const DEFAULT_RECORD_TIMEOUT_MS: u32 = 1000;
/// Synchronous call poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 10;
/// Do-not-kill exemption poll retries
pub const DEFAULT_EXEMPTION_RETRIES: u32 = 10;
/// Do-not-kill exemption poll interval in milliseconds
pub const DEFAULT_EXEMPTION_POLL_MS: u32 = 10;
/// Shutdown callback table capacity
pub const DEFAULT_CALLBACK_CAPACITY: usize = 32;
/// Appendix-S grace period in milliseconds
pub const DEFAULT_SAVE_GRACE_MS: u64 = 30_000;

/// Tunables and well-known peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpcConfig {
    pub ledger_capacity: usize,
    pub inbox_capacity: usize,
    pub record_timeout_ms: u32,
    pub poll_interval_ms: u32,
    pub exemption_retries: u32,
    pub exemption_poll_ms: u32,
    pub kernel_pid: Pid,
    pub directory_pid: Pid,
    pub power_manager_pid: Pid,
    pub callback_capacity: usize,
    pub save_grace_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            record_timeout_ms: DEFAULT_RECORD_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            exemption_retries: DEFAULT_EXEMPTION_RETRIES,
            exemption_poll_ms: DEFAULT_EXEMPTION_POLL_MS,
            kernel_pid: pid::KERNEL,
            directory_pid: pid::DIRECTORY,
            power_manager_pid: pid::POWER_MANAGER,
            callback_capacity: DEFAULT_CALLBACK_CAPACITY,
            save_grace_ms: DEFAULT_SAVE_GRACE_MS,
        }
    }
}

impl IpcConfig {
    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_record_timeout_ms(mut self, ms: u32) -> Self {
        self.record_timeout_ms = ms;
        self
    }

    /// Poll interval; zero is raised to 1 ms so retry budgets stay finite.
    pub fn with_poll_interval_ms(mut self, ms: u32) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    pub fn with_exemption_poll(mut self, retries: u32, interval_ms: u32) -> Self {
        self.exemption_retries = retries.max(1);
        self.exemption_poll_ms = interval_ms;
        self
    }

    pub fn with_directory_pid(mut self, pid: Pid) -> Self {
        self.directory_pid = pid;
        self
    }

    pub fn with_power_manager_pid(mut self, pid: Pid) -> Self {
        self.power_manager_pid = pid;
        self
    }

    pub fn with_kernel_pid(mut self, pid: Pid) -> Self {
        self.kernel_pid = pid;
        self
    }

    pub fn with_callback_capacity(mut self, capacity: usize) -> Self {
        self.callback_capacity = capacity;
        self
    }

    pub fn with_save_grace_ms(mut self, ms: u64) -> Self {
        self.save_grace_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IpcConfig::default();
        assert_eq!(config.ledger_capacity, 32);
        assert_eq!(config.inbox_capacity, 16);
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.directory_pid, 1);
        assert_eq!(config.power_manager_pid, 1000);
        assert_eq!(config.save_grace_ms, 30_000);
    }

    #[test]
    fn test_zero_poll_interval_is_raised() {
        let config = IpcConfig::default().with_poll_interval_ms(0);
        assert_eq!(config.poll_interval_ms, 1);
    }
}

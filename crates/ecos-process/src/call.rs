//! Synchronous call protocol for IpcContext.
//!
//! A call is a tracked send followed by a bounded poll of the ledger at a
//! fixed interval. There is no blocking wait on the response itself, so the
//! worst-case latency is `timeout_ms` rounded up to one poll interval.

use alloc::format;
use alloc::vec::Vec;

use ecos_hal::Kernel;
use ecos_ipc::Pid;

use crate::error::IpcError;
use crate::ledger::DeliveryState;
use crate::IpcContext;

impl<K: Kernel> IpcContext<K> {
    /// Send `request` to `pid` and wait for its response.
    ///
    /// Polls every `poll_interval_ms` for at most
    /// `max(1, timeout_ms / poll_interval_ms)` rounds. The request is sent
    /// exactly once.
    ///
    /// # Returns
    /// * `Ok(response)` - Receiver consumed the request (empty if the outcome
    ///   is `Unknown`)
    /// * `Err(ServiceUnavailable)` - Delivery failed or the message was lost
    /// * `Err(PermissionDenied)` - Receiver not reachable by this process
    /// * `Err(Timeout)` - No terminal state within the retry budget
    pub fn call(
        &self,
        pid: Pid,
        message_id: u32,
        request: &[u8],
        timeout_ms: u32,
    ) -> Result<Vec<u8>, IpcError> {
        let seq = self.send_with_timeout(pid, message_id, request, true, timeout_ms)?;

        let interval = self.config.poll_interval_ms.max(1);
        let retries = (timeout_ms / interval).max(1);

        for _ in 0..retries {
            let outcome = match self.state(seq) {
                DeliveryState::Received => {
                    let response = self.forget(seq).and_then(|r| r.response);
                    Some(Ok(response.unwrap_or_default()))
                }
                DeliveryState::Unknown => {
                    self.forget(seq);
                    Some(Ok(Vec::new()))
                }
                DeliveryState::DeliveryFailed
                | DeliveryState::LostMessage
                | DeliveryState::SentFailed => Some(Err(IpcError::ServiceUnavailable)),
                DeliveryState::PermissionDenied => Some(Err(IpcError::PermissionDenied)),
                DeliveryState::Pending
                | DeliveryState::Sending
                | DeliveryState::Sent
                | DeliveryState::Delivered => None,
            };

            if let Some(result) = outcome {
                if let Err(e) = &result {
                    self.forget(seq);
                    self.log(&format!(
                        "call: failed seq={} to={} msg=0x{:08x} err={}",
                        seq, pid, message_id, e
                    ));
                }
                return result;
            }
            self.kernel.sleep_ms(interval);
        }

        self.forget(seq);
        self.log(&format!(
            "call: timeout seq={} to={} msg=0x{:08x} after={}ms",
            seq, pid, message_id, timeout_ms
        ));
        Err(IpcError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use crate::{IpcConfig, IpcContext, IpcError};
    use alloc::vec;
    use ecos_hal_mock::MockWorld;
    use ecos_ipc::Feedback;

    #[test]
    fn test_call_returns_response() {
        let world = MockWorld::new();
        world.reply_with(9, b"pong".to_vec());
        let ctx = IpcContext::new(world.process(7), IpcConfig::default());

        assert_eq!(ctx.call(9, 1, b"ping", 1000).unwrap(), b"pong".to_vec());
        assert_eq!(ctx.ledger_len(), 0);
    }

    #[test]
    fn test_call_timeout_respects_budget() {
        let world = MockWorld::new();
        world.silence(9);
        let ctx = IpcContext::new(world.process(7), IpcConfig::default());

        assert_eq!(ctx.call(9, 1, b"ping", 100), Err(IpcError::Timeout));
        // 10 polls, 10 ms apart
        assert_eq!(world.now_ms(), 100);
        assert_eq!(world.send_count(), 1);
    }

    #[test]
    fn test_call_short_timeout_polls_once() {
        let world = MockWorld::new();
        world.silence(9);
        let ctx = IpcContext::new(world.process(7), IpcConfig::default());

        assert_eq!(ctx.call(9, 1, b"ping", 5), Err(IpcError::Timeout));
        assert_eq!(world.now_ms(), 10);
    }

    #[test]
    fn test_call_delivery_failure() {
        let world = MockWorld::new();
        world.on_message(9, |_| vec![Feedback::DeliveryFailed]);
        let ctx = IpcContext::new(world.process(7), IpcConfig::default());

        assert_eq!(
            ctx.call(9, 1, b"ping", 1000),
            Err(IpcError::ServiceUnavailable)
        );
        assert_eq!(world.now_ms(), 0);
    }

    #[test]
    fn test_call_unknown_is_success() {
        let world = MockWorld::new();
        world.on_message(9, |_| vec![Feedback::Unknown]);
        let ctx = IpcContext::new(world.process(7), IpcConfig::default());

        assert_eq!(ctx.call(9, 1, b"ping", 1000), Ok(vec![]));
    }
}

//! The channel between a client cache and its hub.
//!
//! The cache only needs request/response invocations and a push
//! subscription. [`WsTransport`] provides both over a WebSocket; tests plug
//! in an in-process implementation.

mod websocket;

pub use websocket::WsTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Called with the payload of every push of the subscribed event.
pub type PushHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Called after the transport re-established a dropped connection.
pub type ReconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Request/response plus push channel to a hub.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke a hub command and wait for its result.
    async fn invoke(&self, command: &str, arguments: Vec<Value>) -> Result<Value, TransportError>;

    /// Subscribe to a push event.
    fn on_push(&self, event: &str, handler: PushHandler);

    /// Subscribe to successful reconnects.
    fn on_reconnected(&self, handler: ReconnectHandler);

    /// Close the connection and stop reconnecting.
    async fn shutdown(&self);
}

/// Delay before reconnect attempt `attempt` (0-based): exponential growth
/// from `min` capped at `max`, plus up to 50% random jitter.
pub(crate) fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    use rand::Rng;

    let base = min
        .checked_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX))
        .unwrap_or(max)
        .min(max);
    let jitter_ms = (base.as_millis() as u64) / 2;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let min = Duration::from_millis(100);
        let max = Duration::from_secs(2);

        let first = backoff_delay(0, min, max);
        assert!(first >= min && first <= min + min / 2);

        let third = backoff_delay(2, min, max);
        assert!(third >= Duration::from_millis(400));
        assert!(third <= Duration::from_millis(600));

        let late = backoff_delay(30, min, max);
        assert!(late >= max && late <= max + max / 2);
    }
}

//! Timeout defaults and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Time allowed for a connection handshake to complete
pub const ESTABLISH_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Time a sender waits for a receive confirmation
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Time allowed for a liveness probe to be answered
pub const ALIVE_TEST_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Idle interval after which a keep-alive byte is written
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(30_000);

/// Upper bound on graceful shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Age after which cached sent packets are pruned
pub const RESEND_CACHE_TTL: Duration = Duration::from_millis(60_000);

/// Run `fut` with a deadline, mapping expiry to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout_or(fut, duration, || ProtocolError::Timeout).await
}

/// Run `fut` with a deadline, mapping expiry to the error built by `on_timeout`.
pub async fn with_timeout_or<F, T, E>(fut: F, duration: Duration, on_timeout: E) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce() -> ProtocolError,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

//! Async timeout helpers and default durations.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default timeout for connects and single operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default overall deadline for a server-side handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a server waits for sessions to finish after a shutdown request
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` to completion or fail with [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await.map_err(|_| {
        warn!(timeout_ms = duration.as_millis() as u64, "Operation timed out");
        ProtocolError::Timeout
    })
}

/// Like [`with_timeout`] for futures that already return a protocol `Result`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(fut, duration).await?
}

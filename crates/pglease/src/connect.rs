//! Retry-on-connect.

use crate::connection::RawConnection;
use crate::error::{Error, Result};
use crate::pool::Pool;

/// Obtain a raw connection from `pool`, making at most
/// `connection_retry_limit` attempts.
///
/// Retries are immediate; the driver pool is expected to pace its own
/// connect attempts. A budget of 0 still makes one attempt.
///
/// # Errors
///
/// - [`Error::Connection`] with the last driver message once the budget is
///   exhausted.
/// - [`Error::UnexpectedState`] if the driver reports success without a
///   connection handle.
/// - [`Error::PoolClosed`] if the pool is closed; not retried.
pub async fn establish_connection(
    log: &tracing::Span,
    pool: &Pool,
    connection_retry_limit: u32,
) -> Result<RawConnection> {
    // Decremented before every attempt; retry only while it stays above 1.
    let mut remaining = connection_retry_limit.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        remaining = remaining.saturating_sub(1);
        attempt += 1;

        match pool.connect().await {
            Ok(Some(connection)) => {
                tracing::debug!(
                    parent: log,
                    attempt,
                    connection_id = %connection.id(),
                    "established connection"
                );
                return Ok(connection);
            }
            Ok(None) => {
                return Err(Error::UnexpectedState(
                    "connection acquisition succeeded without a connection handle".into(),
                ));
            }
            Err(Error::PoolClosed) => return Err(Error::PoolClosed),
            Err(e) => {
                tracing::error!(
                    parent: log,
                    attempt,
                    remaining_attempts = remaining.saturating_sub(1),
                    error = %e,
                    "failed to establish connection"
                );

                if remaining > 1 {
                    tracing::info!(parent: log, "retrying connection");
                    continue;
                }

                return Err(Error::Connection(e.to_string()));
            }
        }
    }
}

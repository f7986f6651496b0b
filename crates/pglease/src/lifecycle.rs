//! Connection lifecycle orchestration.
//!
//! One call to [`create_connection`] is one logical unit of work:
//!
//! ```text
//! before_pool_connection -> acquire (with retry) -> type overrides
//!   -> after_pool_connection -> handler -> before_pool_connection_release
//!   -> recycle
//! ```
//!
//! Recycling is unconditional. Whether the unit of work succeeds, fails, or
//! is dropped mid-flight, the connection is terminated, removed from the
//! pool, and the pool's waiters are woken. Connections are never returned
//! to an idle set.

use std::future::Future;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::ClientConfiguration;
use crate::connect::establish_connection;
use crate::connection::{
    BoundConnection, ConnectionContext, ConnectionType, RawConnection, TerminationReason,
};
use crate::error::{Error, Result};
use crate::interceptor::{self, PoolConnectionContext, Query};
use crate::pool::Pool;

/// Exclusive ownership of an acquired connection.
///
/// Dropping the lease terminates the connection and removes it from the
/// pool, recording the outcome set by [`ConnectionLease::finish`] or
/// [`TerminationReason::Abandoned`] when none was set.
struct ConnectionLease {
    pool: Arc<Pool>,
    connection: Arc<RawConnection>,
    outcome: Option<TerminationReason>,
}

impl ConnectionLease {
    fn new(pool: Arc<Pool>, connection: Arc<RawConnection>) -> Self {
        pool.record_acquired();
        Self {
            pool,
            connection,
            outcome: None,
        }
    }

    fn finish<T>(mut self, result: &Result<T>) {
        self.outcome = Some(match result {
            Ok(_) => TerminationReason::Released,
            Err(e) => TerminationReason::Failed(e.to_string()),
        });
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let reason = self.outcome.take().unwrap_or_else(|| {
            tracing::warn!(
                connection_id = %self.connection.id(),
                "unit of work dropped before completion"
            );
            TerminationReason::Abandoned
        });
        self.pool.force_terminate(&self.connection, reason);
    }
}

/// Run one logical unit of work against a connection from `pool`.
///
/// `handler` receives the connection span, the raw connection, its bound
/// view, and the client configuration. Its result is what the caller
/// observes; the connection is recycled before this function returns.
///
/// If a `before_pool_connection` interceptor redirects to another pool,
/// `pool_handler` is invoked with that pool instead and its result is
/// returned. No connection is requested from `pool` in that case.
///
/// # Errors
///
/// - [`Error::Connection`] when the connect-attempt budget is exhausted.
/// - [`Error::UnexpectedState`] when the driver yields no connection.
/// - [`Error::QueryCancelled`], [`Error::StatementTimeout`], or
///   [`Error::BackendTerminated`] when the handler's statement was
///   interrupted.
/// - Any other error raised by an interceptor or the handler, unchanged.
pub async fn create_connection<T, H, HFut, P, PFut>(
    parent_log: &tracing::Span,
    pool: &Arc<Pool>,
    config: &Arc<ClientConfiguration>,
    connection_type: ConnectionType,
    handler: H,
    pool_handler: P,
    query: Option<&Query>,
) -> Result<T>
where
    H: FnOnce(tracing::Span, Arc<RawConnection>, BoundConnection, Arc<ClientConfiguration>) -> HFut,
    HFut: Future<Output = Result<T>>,
    P: FnOnce(Arc<Pool>) -> PFut,
    PFut: Future<Output = Result<T>>,
{
    let pool_context = PoolConnectionContext {
        log: parent_log,
        pool_id: pool.id(),
        query,
    };
    if let Some(alternate) =
        interceptor::before_pool_connection(&config.interceptors, &pool_context)
            .await
            .map_err(classify)?
    {
        pool.record_redirect();
        return pool_handler(alternate).await;
    }

    let connection = Arc::new(
        establish_connection(parent_log, pool, config.connection_retry_limit).await?,
    );
    let lease = ConnectionLease::new(Arc::clone(pool), Arc::clone(&connection));

    let log = tracing::debug_span!(
        parent: parent_log,
        "connection",
        connection_id = %connection.id(),
        connection_type = %connection_type,
        pool_id = %pool.id(),
    );
    let context = ConnectionContext {
        connection_id: connection.id(),
        connection_type,
        log: log.clone(),
        pool_id: pool.id().clone(),
    };
    let bound = BoundConnection::new(Arc::clone(&connection));

    let result: Result<T> = async {
        let overrides = pool
            .type_overrides(connection.native().as_ref(), &config.type_parsers)
            .await?;
        connection.attach_type_overrides(overrides);

        interceptor::after_pool_connection(&config.interceptors, &context, &bound)
            .await
            .map_err(classify)?;

        let value = handler(
            log.clone(),
            Arc::clone(&connection),
            bound.clone(),
            Arc::clone(config),
        )
        .await
        .map_err(classify)?;

        interceptor::before_pool_connection_release(&config.interceptors, &context, &bound)
            .await
            .map_err(classify)?;

        Ok::<T, Error>(value)
    }
    .instrument(log.clone())
    .await;

    match &result {
        Ok(_) => tracing::debug!(parent: &log, "unit of work completed"),
        Err(e) => tracing::debug!(parent: &log, error = %e, "unit of work failed"),
    }

    lease.finish(&result);
    result
}

/// Translate driver errors a handler or interceptor returned without
/// classification.
fn classify(error: Error) -> Error {
    match error {
        Error::Driver(e) => Error::from(e),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::driver::{DriverPool, NativeConnection, RawQueryResult};
    use crate::error::DriverError;
    use crate::interceptor::Interceptor;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct NullSession;

    #[async_trait]
    impl NativeConnection for NullSession {
        async fn query(
            &self,
            _sql: &str,
            _values: &[serde_json::Value],
        ) -> std::result::Result<RawQueryResult, DriverError> {
            Ok(RawQueryResult::default())
        }
    }

    #[derive(Default)]
    struct LiveSetDriver {
        next_id: AtomicU64,
        live: Mutex<HashSet<ConnectionId>>,
    }

    #[async_trait]
    impl DriverPool for LiveSetDriver {
        async fn connect(&self) -> std::result::Result<Option<RawConnection>, DriverError> {
            let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.live.lock().insert(id);
            Ok(Some(RawConnection::new(id, Arc::new(NullSession))))
        }

        fn remove(&self, connection: &RawConnection) {
            self.live.lock().remove(&connection.id());
        }

        fn pulse_queue(&self) {}
    }

    fn setup() -> (Arc<LiveSetDriver>, Arc<Pool>, Arc<ClientConfiguration>) {
        let driver = Arc::new(LiveSetDriver::default());
        let pool = Arc::new(Pool::new(driver.clone()));
        (driver, pool, Arc::new(ClientConfiguration::new()))
    }

    async fn unreachable_pool_handler(_pool: Arc<Pool>) -> Result<u64> {
        Err(Error::UnexpectedState("no redirect expected".into()))
    }

    #[tokio::test]
    async fn test_success_recycles_connection() {
        let (driver, pool, config) = setup();

        let id = create_connection(
            &tracing::Span::none(),
            &pool,
            &config,
            ConnectionType::Explicit,
            |_log, raw, _bound, _config| async move { Ok(raw.id().0) },
            unreachable_pool_handler,
            None,
        )
        .await
        .unwrap();

        assert_eq!(id, 1);
        assert!(driver.live.lock().is_empty());
        let metrics = pool.metrics();
        assert_eq!(metrics.connections_acquired, 1);
        assert_eq!(metrics.connections_recycled, 1);
        assert_eq!(metrics.in_use(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_classified_and_recorded() {
        let (driver, pool, config) = setup();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);

        let err = create_connection(
            &tracing::Span::none(),
            &pool,
            &config,
            ConnectionType::ImplicitQuery,
            move |_log, raw, _bound, _config| async move {
                *seen_in_handler.lock() = Some(raw);
                Err::<(), _>(Error::Driver(DriverError::with_code(
                    "57P01",
                    "terminating connection due to administrator command",
                )))
            },
            |_pool| async { Ok(()) },
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::BackendTerminated(_)));
        assert!(driver.live.lock().is_empty());
        let raw = seen.lock().take().unwrap();
        assert_eq!(
            raw.termination(),
            Some(TerminationReason::Failed(err.to_string()))
        );
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_is_abandoned() {
        let (driver, pool, config) = setup();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        let span = tracing::Span::none();

        let unit = create_connection(
            &span,
            &pool,
            &config,
            ConnectionType::Explicit,
            move |_log, raw, _bound, _config| async move {
                *seen_in_handler.lock() = Some(raw);
                std::future::pending::<Result<()>>().await
            },
            |_pool| async { Ok(()) },
            None,
        );
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), unit).await;

        assert!(timed_out.is_err());
        assert!(driver.live.lock().is_empty());
        let raw = seen.lock().take().unwrap();
        assert_eq!(raw.termination(), Some(TerminationReason::Abandoned));
    }

    /// Fails its hooks with unclassified driver errors.
    struct DriverFailingInterceptor {
        at_release: bool,
    }

    #[async_trait]
    impl Interceptor for DriverFailingInterceptor {
        async fn after_pool_connection(
            &self,
            _context: &ConnectionContext,
            _connection: &BoundConnection,
        ) -> Result<()> {
            if self.at_release {
                return Ok(());
            }
            Err(Error::Driver(DriverError::with_code(
                "57P01",
                "terminating connection due to administrator command",
            )))
        }

        async fn before_pool_connection_release(
            &self,
            _context: &ConnectionContext,
            _connection: &BoundConnection,
        ) -> Result<()> {
            Err(Error::Driver(DriverError::with_code(
                "57014",
                "canceling statement due to statement timeout",
            )))
        }
    }

    #[tokio::test]
    async fn test_interceptor_driver_errors_are_classified() {
        for (at_release, terminated) in [(false, true), (true, false)] {
            let (driver, pool, _config) = setup();
            let config = Arc::new(
                ClientConfiguration::new()
                    .interceptor(Arc::new(DriverFailingInterceptor { at_release })),
            );

            let err = create_connection(
                &tracing::Span::none(),
                &pool,
                &config,
                ConnectionType::Explicit,
                |_log, _raw, _bound, _config| async move { Ok(()) },
                |_pool| async { Ok(()) },
                None,
            )
            .await
            .unwrap_err();

            if terminated {
                assert!(matches!(err, Error::BackendTerminated(_)));
            } else {
                assert!(matches!(err, Error::StatementTimeout(_)));
            }
            assert!(err.is_transient());
            assert!(driver.live.lock().is_empty());
        }
    }

    #[test]
    fn test_classify_leaves_other_errors_alone() {
        let err = classify(Error::other("hook failed"));
        assert_eq!(err.to_string(), "hook failed");

        let err = classify(Error::Driver(DriverError::with_code(
            "57014",
            "canceling statement due to user request",
        )));
        assert!(matches!(err, Error::QueryCancelled(_)));
    }

    #[test]
    fn test_lease_drop_without_finish_abandons() {
        let (driver, pool, _config) = setup();
        let connection = Arc::new(RawConnection::new(ConnectionId(9), Arc::new(NullSession)));
        driver.live.lock().insert(ConnectionId(9));

        drop(ConnectionLease::new(Arc::clone(&pool), Arc::clone(&connection)));

        assert!(driver.live.lock().is_empty());
        assert_eq!(connection.termination(), Some(TerminationReason::Abandoned));
    }
}

//! Interceptor pipeline.
//!
//! Interceptors are externally supplied hook bundles invoked at three points
//! of every unit of work:
//!
//! ```text
//! before_pool_connection          (may redirect to another pool)
//!   -> acquire, attach type overrides
//! after_pool_connection
//!   -> handler
//! before_pool_connection_release
//!   -> recycle
//! ```
//!
//! Every hook has a no-op default, so an interceptor implements only the
//! points it cares about. Hooks at a given point run sequentially in
//! configuration order; the first failure stops the pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{BoundConnection, ConnectionContext};
use crate::error::Result;
use crate::pool::{Pool, PoolId};

/// A statement about to run, as seen by `before_pool_connection`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// SQL text.
    pub sql: String,
    /// Positional parameter values.
    pub values: Vec<serde_json::Value>,
}

impl Query {
    /// Create a query.
    pub fn new(sql: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }
}

/// Context passed to `before_pool_connection`.
#[derive(Debug, Clone, Copy)]
pub struct PoolConnectionContext<'a> {
    /// Parent span of the unit of work.
    pub log: &'a tracing::Span,
    /// Identifier of the pool about to be used.
    pub pool_id: &'a PoolId,
    /// Query that triggered the unit of work, if any.
    pub query: Option<&'a Query>,
}

/// Lifecycle hooks.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Called before a connection is requested.
    ///
    /// Returning `Some(pool)` abandons the current pool and runs the unit of
    /// work against `pool` instead. Later interceptors are skipped.
    async fn before_pool_connection(
        &self,
        _context: &PoolConnectionContext<'_>,
    ) -> Result<Option<Arc<Pool>>> {
        Ok(None)
    }

    /// Called after a connection is acquired, before the handler runs.
    async fn after_pool_connection(
        &self,
        _context: &ConnectionContext,
        _connection: &BoundConnection,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the handler succeeds, before the connection is recycled.
    async fn before_pool_connection_release(
        &self,
        _context: &ConnectionContext,
        _connection: &BoundConnection,
    ) -> Result<()> {
        Ok(())
    }
}

/// Run `before_pool_connection` hooks in order.
///
/// Returns the first alternate pool any hook produced.
pub(crate) async fn before_pool_connection(
    interceptors: &[Arc<dyn Interceptor>],
    context: &PoolConnectionContext<'_>,
) -> Result<Option<Arc<Pool>>> {
    for interceptor in interceptors {
        if let Some(pool) = interceptor.before_pool_connection(context).await? {
            tracing::debug!(
                interceptor = interceptor.name(),
                pool_id = %context.pool_id,
                alternate_pool_id = %pool.id(),
                "interceptor redirected unit of work to another pool"
            );
            return Ok(Some(pool));
        }
    }
    Ok(None)
}

/// Run `after_pool_connection` hooks in order.
pub(crate) async fn after_pool_connection(
    interceptors: &[Arc<dyn Interceptor>],
    context: &ConnectionContext,
    connection: &BoundConnection,
) -> Result<()> {
    for interceptor in interceptors {
        interceptor
            .after_pool_connection(context, connection)
            .await
            .inspect_err(|e| {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "after_pool_connection failed"
                );
            })?;
    }
    Ok(())
}

/// Run `before_pool_connection_release` hooks in order.
pub(crate) async fn before_pool_connection_release(
    interceptors: &[Arc<dyn Interceptor>],
    context: &ConnectionContext,
    connection: &BoundConnection,
) -> Result<()> {
    for interceptor in interceptors {
        interceptor
            .before_pool_connection_release(context, connection)
            .await
            .inspect_err(|e| {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "before_pool_connection_release failed"
                );
            })?;
    }
    Ok(())
}

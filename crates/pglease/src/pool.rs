//! Pool resource.
//!
//! A [`Pool`] wraps the driver's [`DriverPool`] with the state the lifecycle
//! shares across units of work: a unique identifier, the memoized type
//! overrides, and lifecycle counters.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;

use crate::connection::{RawConnection, TerminationReason};
use crate::driver::{DriverPool, NativeConnection};
use crate::error::{Error, Result};
use crate::type_overrides::{TypeOverrides, TypeParser};

/// Unique pool identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolId(Arc<str>);

impl PoolId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    /// Get the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connection pool shared by every unit of work issued against it.
///
/// Created once per client configuration and shared behind an [`Arc`].
pub struct Pool {
    id: PoolId,
    driver: Arc<dyn DriverPool>,
    closed: AtomicBool,
    type_overrides: parking_lot::RwLock<Arc<OnceCell<Arc<TypeOverrides>>>>,
    created_at: Instant,
    metrics: PoolMetricsInner,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    connections_acquired: AtomicU64,
    connections_recycled: AtomicU64,
    redirects: AtomicU64,
}

impl Pool {
    /// Create a pool over a driver pool.
    pub fn new(driver: Arc<dyn DriverPool>) -> Self {
        let id = PoolId::generate();
        tracing::info!(pool_id = %id, "connection pool created");

        Self {
            id,
            driver,
            closed: AtomicBool::new(false),
            type_overrides: parking_lot::RwLock::new(Arc::new(OnceCell::new())),
            created_at: Instant::now(),
            metrics: PoolMetricsInner::default(),
        }
    }

    /// Get the pool identifier.
    #[must_use]
    pub fn id(&self) -> &PoolId {
        &self.id
    }

    /// Request one raw connection from the driver.
    ///
    /// Each call counts as one connect attempt.
    pub async fn connect(&self) -> Result<Option<RawConnection>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        self.metrics.connect_attempts.fetch_add(1, Ordering::Relaxed);
        match self.driver.connect().await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                self.metrics.connect_failures.fetch_add(1, Ordering::Relaxed);
                Err(Error::Driver(e))
            }
        }
    }

    /// Get the memoized type overrides, resolving them on `native` if this
    /// is the first use of the pool.
    ///
    /// Concurrent first uses await the same in-flight resolution. A failed
    /// resolution is not memoized.
    pub async fn type_overrides(
        &self,
        native: &dyn NativeConnection,
        parsers: &[TypeParser],
    ) -> Result<Arc<TypeOverrides>> {
        let cell = self.type_overrides.read().clone();
        let overrides = cell
            .get_or_try_init(|| async {
                tracing::debug!(pool_id = %self.id, "resolving type overrides");
                TypeOverrides::resolve(native, parsers).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(overrides))
    }

    /// Check if type overrides have been memoized.
    #[must_use]
    pub fn has_type_overrides(&self) -> bool {
        self.type_overrides.read().initialized()
    }

    /// Mark `connection` terminated, remove it from the driver's live set,
    /// and wake waiters.
    ///
    /// Idempotent: the first recorded reason wins.
    pub fn force_terminate(&self, connection: &RawConnection, reason: TerminationReason) {
        if !connection.mark_terminated(reason) {
            return;
        }

        self.remove_connection(connection);
        self.metrics
            .connections_recycled
            .fetch_add(1, Ordering::Relaxed);
        self.pulse_queue();

        tracing::trace!(
            pool_id = %self.id,
            connection_id = %connection.id(),
            "connection terminated and removed from pool"
        );
    }

    /// Remove `connection` from the driver's live set.
    pub fn remove_connection(&self, connection: &RawConnection) {
        self.driver.remove(connection);
    }

    /// Wake waiters queued for pool capacity.
    pub fn pulse_queue(&self) {
        self.driver.pulse_queue();
    }

    pub(crate) fn record_acquired(&self) {
        self.metrics
            .connections_acquired
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.metrics.redirects.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the pool.
    ///
    /// Ends the driver pool and drops the memoized type overrides.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.type_overrides.write() = Arc::new(OnceCell::new());
        self.driver.end().await;
        tracing::info!(pool_id = %self.id, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            connect_attempts: self.metrics.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.metrics.connect_failures.load(Ordering::Relaxed),
            connections_acquired: self.metrics.connections_acquired.load(Ordering::Relaxed),
            connections_recycled: self.metrics.connections_recycled.load(Ordering::Relaxed),
            redirects: self.metrics.redirects.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Snapshot of pool lifecycle counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics {
    /// Connect attempts made against the driver.
    pub connect_attempts: u64,
    /// Connect attempts that failed.
    pub connect_failures: u64,
    /// Connections handed to a unit of work.
    pub connections_acquired: u64,
    /// Connections terminated and removed.
    pub connections_recycled: u64,
    /// Units of work redirected to another pool before acquisition.
    pub redirects: u64,
    /// Time since the pool was created.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Connections acquired but not yet recycled.
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.connections_acquired
            .saturating_sub(self.connections_recycled)
    }
}

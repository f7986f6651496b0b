//! Test fixture utilities.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pglease::{
    BoundConnection, ClientConfiguration, ConnectionContext, Error, Interceptor, Pool,
    PoolConnectionContext, Result,
};

use crate::mock_driver::MockDriverPool;

/// Shared, ordered journal of interceptor events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    /// Get a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Lifecycle point an interceptor can be told to fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// `before_pool_connection`.
    BeforeConnection,
    /// `after_pool_connection`.
    AfterConnection,
    /// `before_pool_connection_release`.
    BeforeRelease,
}

/// An interceptor that journals every hook invocation as
/// `"<name>:<hook>:<phase>"` and can redirect or fail on demand.
pub struct RecordingInterceptor {
    name: String,
    log: EventLog,
    redirect: Option<Arc<Pool>>,
    fail_at: Option<HookPoint>,
}

impl RecordingInterceptor {
    /// Create an interceptor writing to `log`.
    pub fn new(name: impl Into<String>, log: &EventLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            redirect: None,
            fail_at: None,
        }
    }

    /// Redirect every unit of work to `pool`.
    #[must_use]
    pub fn redirect_to(mut self, pool: Arc<Pool>) -> Self {
        self.redirect = Some(pool);
        self
    }

    /// Fail at `point`.
    #[must_use]
    pub fn fail_at(mut self, point: HookPoint) -> Self {
        self.fail_at = Some(point);
        self
    }

    async fn record(&self, hook: &str, point: HookPoint) -> Result<()> {
        self.log.push(format!("{}:{hook}:start", self.name));
        tokio::task::yield_now().await;
        self.log.push(format!("{}:{hook}:end", self.name));

        if self.fail_at == Some(point) {
            return Err(Error::other(format!("{} failed in {hook}", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_pool_connection(
        &self,
        _context: &PoolConnectionContext<'_>,
    ) -> Result<Option<Arc<Pool>>> {
        self.record("before_pool_connection", HookPoint::BeforeConnection)
            .await?;
        Ok(self.redirect.clone())
    }

    async fn after_pool_connection(
        &self,
        _context: &ConnectionContext,
        _connection: &BoundConnection,
    ) -> Result<()> {
        self.record("after_pool_connection", HookPoint::AfterConnection)
            .await
    }

    async fn before_pool_connection_release(
        &self,
        _context: &ConnectionContext,
        _connection: &BoundConnection,
    ) -> Result<()> {
        self.record("before_pool_connection_release", HookPoint::BeforeRelease)
            .await
    }
}

/// A mock driver wrapped in a pool.
pub struct TestPool {
    /// The mock driver.
    pub driver: Arc<MockDriverPool>,
    /// The pool over it.
    pub pool: Arc<Pool>,
}

impl TestPool {
    /// Wrap `driver` in a fresh pool.
    #[must_use]
    pub fn new(driver: Arc<MockDriverPool>) -> Self {
        let pool = Arc::new(Pool::new(driver.clone()));
        Self { driver, pool }
    }

    /// A pool over a driver that always connects.
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(MockDriverPool::builder().build())
    }
}

/// Build an `Arc`-shared configuration from a builder.
#[must_use]
pub fn shared(config: ClientConfiguration) -> Arc<ClientConfiguration> {
    Arc::new(config)
}

//! Mock driver pool for unit testing.
//!
//! This module provides a scriptable [`DriverPool`] and backend session that
//! can be used to exercise the connection lifecycle without a PostgreSQL
//! server.
//!
//! ## Features
//!
//! - Scripted connect outcomes (failures, empty handles) before falling back
//!   to successful connects
//! - Configurable responses for SQL statements
//! - A live-connection set, removal log, and pulse counter for asserting
//!   recycling behavior
//! - Built-in `pg_type` lookup answers for type-override resolution
//!
//! ## Example
//!
//! ```rust,ignore
//! use pglease_testing::mock_driver::{MockDriverPool, MockResponse};
//!
//! let driver = MockDriverPool::builder()
//!     .fail_connects(2, "connection refused")
//!     .with_response("SELECT 1", MockResponse::scalar("?column?", 23, "1"))
//!     .build();
//!
//! let pool = Arc::new(Pool::new(driver.clone()));
//! // Run units of work, then inspect driver.live_connections()...
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pglease::type_overrides::TYPE_LOOKUP_QUERY;
use pglease::{
    ConnectionId, DriverError, DriverPool, FieldDescription, NativeConnection, RawConnection,
    RawQueryResult, TypeOverrides,
};

/// OID of the `text` type.
pub const TEXT_OID: u32 = 25;
/// OID of the `oid` type.
pub const OID_OID: u32 = 26;
/// OID of the `name` type.
pub const NAME_OID: u32 = 19;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows.
    Rows {
        /// Column definitions.
        fields: Vec<FieldDescription>,
        /// Row data in text format.
        rows: Vec<Vec<Option<String>>>,
    },

    /// Return an affected-row count (for INSERT/UPDATE/DELETE).
    Affected(u64),

    /// Return a driver error.
    Error(DriverError),

    /// Compute the response from the statement and its parameters.
    Custom(Arc<dyn Fn(&str, &[serde_json::Value]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { fields, rows } => f
                .debug_struct("Rows")
                .field("fields", fields)
                .field("rows", rows)
                .finish(),
            Self::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a response with no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::Rows {
            fields: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Create a single-column, single-row response.
    pub fn scalar(name: impl Into<String>, type_oid: u32, value: impl Into<String>) -> Self {
        Self::Rows {
            fields: vec![FieldDescription::new(name, type_oid)],
            rows: vec![vec![Some(value.into())]],
        }
    }

    /// Create a rows response.
    #[must_use]
    pub fn rows(fields: Vec<FieldDescription>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self::Rows { fields, rows }
    }

    /// Create an affected-rows response.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self::Affected(count)
    }

    /// Create an error response with a SQLSTATE code.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(DriverError::with_code(code, message))
    }

    /// Statement cancelled by another session (`pg_cancel_backend`).
    #[must_use]
    pub fn cancelled() -> Self {
        Self::error("57014", "canceling statement due to user request")
    }

    /// Statement cancelled by `statement_timeout`.
    #[must_use]
    pub fn statement_timeout() -> Self {
        Self::error("57014", "canceling statement due to statement timeout")
    }

    /// Backend terminated by an administrator (`pg_terminate_backend`).
    #[must_use]
    pub fn terminated() -> Self {
        Self::error("57P01", "terminating connection due to administrator command")
    }

    /// Create a response computed per call.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &[serde_json::Value]) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn resolve(&self, sql: &str, values: &[serde_json::Value]) -> Result<RawQueryResult, DriverError> {
        match self {
            Self::Rows { fields, rows } => Ok(RawQueryResult {
                fields: fields.clone(),
                rows: rows.clone(),
                row_count: rows.len() as u64,
            }),
            Self::Affected(n) => Ok(RawQueryResult {
                row_count: *n,
                ..RawQueryResult::default()
            }),
            Self::Error(e) => Err(e.clone()),
            Self::Custom(f) => f(sql, values).resolve(sql, values),
        }
    }
}

/// Scripted outcome of a single connect call.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Hand out a new connection.
    Connect,
    /// Fail with the given driver error.
    Fail(DriverError),
    /// Report success without a connection handle.
    Empty,
}

/// A backend type known to the mock `pg_type` catalog.
#[derive(Debug, Clone)]
pub struct MockType {
    /// Type name.
    pub name: String,
    /// Element OID.
    pub oid: u32,
    /// Array OID.
    pub array_oid: u32,
}

/// A statement executed against the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    /// Connection that ran the statement.
    pub connection_id: ConnectionId,
    /// SQL text.
    pub sql: String,
    /// Parameter values.
    pub values: Vec<serde_json::Value>,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<ConnectOutcome>>,
    responses: HashMap<String, MockResponse>,
    default_response: Option<MockResponse>,
    types: Vec<MockType>,
    query_delay: Option<Duration>,
    type_lookup_failures: AtomicUsize,
    next_id: AtomicU64,
    connect_attempts: AtomicUsize,
    live: Mutex<BTreeSet<ConnectionId>>,
    removed: Mutex<Vec<ConnectionId>>,
    pulses: AtomicUsize,
    type_lookups: AtomicUsize,
    native_overrides_attached: AtomicUsize,
    executed: Mutex<Vec<ExecutedStatement>>,
    ended: AtomicBool,
}

impl MockState {
    fn type_lookup(&self, values: &[serde_json::Value]) -> Result<RawQueryResult, DriverError> {
        self.type_lookups.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .type_lookup_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DriverError::with_code("53300", "sorry, too many clients already"));
        }

        let requested: Vec<&str> = values
            .first()
            .and_then(serde_json::Value::as_array)
            .map(|names| names.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default();

        let rows: Vec<Vec<Option<String>>> = self
            .types
            .iter()
            .filter(|t| requested.contains(&t.name.as_str()))
            .map(|t| {
                vec![
                    Some(t.oid.to_string()),
                    Some(t.array_oid.to_string()),
                    Some(t.name.clone()),
                ]
            })
            .collect();

        Ok(RawQueryResult {
            fields: vec![
                FieldDescription::new("oid", OID_OID),
                FieldDescription::new("typarray", OID_OID),
                FieldDescription::new("typname", NAME_OID),
            ],
            row_count: rows.len() as u64,
            rows,
        })
    }
}

/// Builder for [`MockDriverPool`].
#[derive(Default)]
pub struct MockDriverBuilder {
    state: MockState,
}

impl MockDriverBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted connect outcome. Once the script is exhausted every
    /// connect succeeds.
    #[must_use]
    pub fn with_connect_outcome(self, outcome: ConnectOutcome) -> Self {
        self.state.script.lock().push_back(outcome);
        self
    }

    /// Queue `count` connect failures.
    #[must_use]
    pub fn fail_connects(mut self, count: usize, message: &str) -> Self {
        for attempt in 1..=count {
            self = self.with_connect_outcome(ConnectOutcome::Fail(DriverError::new(format!(
                "{message} (attempt {attempt})"
            ))));
        }
        self
    }

    /// Register a response for a SQL statement.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.state.responses.insert(sql.into(), response);
        self
    }

    /// Set the response for statements without a registered response.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.state.default_response = Some(response);
        self
    }

    /// Add a type to the mock `pg_type` catalog.
    #[must_use]
    pub fn with_type(mut self, name: impl Into<String>, oid: u32, array_oid: u32) -> Self {
        self.state.types.push(MockType {
            name: name.into(),
            oid,
            array_oid,
        });
        self
    }

    /// Fail the next `count` `pg_type` lookups.
    #[must_use]
    pub fn fail_type_lookups(self, count: usize) -> Self {
        self.state.type_lookup_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Delay every statement, so concurrent units of work overlap.
    #[must_use]
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.state.query_delay = Some(delay);
        self
    }

    /// Build the mock driver pool.
    #[must_use]
    pub fn build(self) -> Arc<MockDriverPool> {
        Arc::new(MockDriverPool {
            state: Arc::new(self.state),
        })
    }
}

/// A scriptable driver pool.
pub struct MockDriverPool {
    state: Arc<MockState>,
}

impl MockDriverPool {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Connections handed out and not yet removed.
    #[must_use]
    pub fn live_connections(&self) -> Vec<ConnectionId> {
        self.state.live.lock().iter().copied().collect()
    }

    /// Number of connect calls.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Connections removed, in order (duplicates included).
    #[must_use]
    pub fn removed(&self) -> Vec<ConnectionId> {
        self.state.removed.lock().clone()
    }

    /// Number of queue pulses.
    #[must_use]
    pub fn pulse_count(&self) -> usize {
        self.state.pulses.load(Ordering::SeqCst)
    }

    /// Number of `pg_type` lookups served.
    #[must_use]
    pub fn type_lookups(&self) -> usize {
        self.state.type_lookups.load(Ordering::SeqCst)
    }

    /// Number of times type overrides were handed to a session.
    #[must_use]
    pub fn native_overrides_attached(&self) -> usize {
        self.state.native_overrides_attached.load(Ordering::SeqCst)
    }

    /// Statements executed, excluding `pg_type` lookups.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.executed.lock().clone()
    }

    /// Check if the pool was ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverPool for MockDriverPool {
    async fn connect(&self) -> Result<Option<RawConnection>, DriverError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let outcome = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Connect);

        match outcome {
            ConnectOutcome::Connect => {
                let id = ConnectionId(self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                self.state.live.lock().insert(id);
                tracing::trace!(connection_id = %id, "mock connection opened");
                let session = MockSession {
                    id,
                    state: Arc::clone(&self.state),
                };
                Ok(Some(RawConnection::new(id, Arc::new(session))))
            }
            ConnectOutcome::Fail(e) => Err(e),
            ConnectOutcome::Empty => Ok(None),
        }
    }

    fn remove(&self, connection: &RawConnection) {
        self.state.live.lock().remove(&connection.id());
        self.state.removed.lock().push(connection.id());
    }

    fn pulse_queue(&self) {
        self.state.pulses.fetch_add(1, Ordering::SeqCst);
    }

    async fn end(&self) {
        self.state.ended.store(true, Ordering::SeqCst);
    }
}

/// Backend session handed out by [`MockDriverPool`].
pub struct MockSession {
    id: ConnectionId,
    state: Arc<MockState>,
}

#[async_trait]
impl NativeConnection for MockSession {
    async fn query(
        &self,
        sql: &str,
        values: &[serde_json::Value],
    ) -> Result<RawQueryResult, DriverError> {
        if let Some(delay) = self.state.query_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if sql == TYPE_LOOKUP_QUERY {
            return self.state.type_lookup(values);
        }

        self.state.executed.lock().push(ExecutedStatement {
            connection_id: self.id,
            sql: sql.to_owned(),
            values: values.to_vec(),
        });

        match self
            .state
            .responses
            .get(sql)
            .or(self.state.default_response.as_ref())
        {
            Some(response) => response.resolve(sql, values),
            None => Ok(RawQueryResult::default()),
        }
    }

    fn attach_type_overrides(&self, _overrides: Arc<TypeOverrides>) {
        self.state
            .native_overrides_attached
            .fetch_add(1, Ordering::SeqCst);
    }
}

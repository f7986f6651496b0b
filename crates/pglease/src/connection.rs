//! Raw and bound connections.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{FieldDescription, NativeConnection};
use crate::error::{Error, Result};
use crate::pool::PoolId;
use crate::type_overrides::TypeOverrides;

/// Driver-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Purpose of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// The caller asked for a connection explicitly.
    Explicit,
    /// A single query borrowed a connection.
    ImplicitQuery,
    /// A transaction borrowed a connection.
    ImplicitTransaction,
}

impl ConnectionType {
    /// Get the tag used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "EXPLICIT",
            Self::ImplicitQuery => "IMPLICIT_QUERY",
            Self::ImplicitTransaction => "IMPLICIT_TRANSACTION",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a raw connection was terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The unit of work completed and the connection was recycled.
    Released,
    /// The unit of work failed with the recorded error.
    Failed(String),
    /// The unit of work was dropped before it completed.
    Abandoned,
}

/// The driver's connection handle.
///
/// Owned by exactly one unit of work and never returned to the idle set.
pub struct RawConnection {
    id: ConnectionId,
    native: Arc<dyn NativeConnection>,
    terminated: Mutex<Option<TerminationReason>>,
    type_overrides: Mutex<Option<Arc<TypeOverrides>>>,
}

impl RawConnection {
    /// Wrap a backend session.
    pub fn new(id: ConnectionId, native: Arc<dyn NativeConnection>) -> Self {
        Self {
            id,
            native,
            terminated: Mutex::new(None),
            type_overrides: Mutex::new(None),
        }
    }

    /// Get the connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the backend session.
    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeConnection> {
        &self.native
    }

    /// Get the termination reason, if the connection has been terminated.
    #[must_use]
    pub fn termination(&self) -> Option<TerminationReason> {
        self.terminated.lock().clone()
    }

    /// Check if the connection has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.lock().is_some()
    }

    /// Record the termination reason unless one is already set.
    ///
    /// Returns `true` if this call set it.
    pub(crate) fn mark_terminated(&self, reason: TerminationReason) -> bool {
        let mut terminated = self.terminated.lock();
        if terminated.is_some() {
            return false;
        }
        *terminated = Some(reason);
        true
    }

    /// Get the attached type overrides.
    #[must_use]
    pub fn type_overrides(&self) -> Option<Arc<TypeOverrides>> {
        self.type_overrides.lock().clone()
    }

    pub(crate) fn attach_type_overrides(&self, overrides: Arc<TypeOverrides>) {
        self.native.attach_type_overrides(Arc::clone(&overrides));
        *self.type_overrides.lock() = Some(overrides);
    }
}

impl fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConnection")
            .field("id", &self.id)
            .field("terminated", &*self.terminated.lock())
            .finish_non_exhaustive()
    }
}

/// Decoded result of a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result columns.
    pub fields: Vec<FieldDescription>,
    /// Rows keyed by column name.
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Number of rows affected or returned.
    pub row_count: u64,
}

/// Restricted view of a raw connection handed to handlers and interceptors.
///
/// Does not expose termination or pool controls.
#[derive(Clone)]
pub struct BoundConnection {
    raw: Arc<RawConnection>,
}

impl BoundConnection {
    pub(crate) fn new(raw: Arc<RawConnection>) -> Self {
        Self { raw }
    }

    /// Get the connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.raw.id()
    }

    /// Check if the underlying connection has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.raw.is_terminated()
    }

    /// Run one statement and decode its rows through the pool's type
    /// overrides.
    ///
    /// Driver failures are classified (cancellation, statement timeout,
    /// backend termination) before they are returned.
    pub async fn query(&self, sql: &str, values: &[serde_json::Value]) -> Result<QueryResult> {
        if self.raw.is_terminated() {
            return Err(Error::UnexpectedState(format!(
                "connection {} has already been terminated",
                self.raw.id()
            )));
        }

        tracing::trace!(connection_id = %self.raw.id(), sql = sql, "executing statement");

        let raw = self.raw.native().query(sql, values).await?;
        let overrides = self.raw.type_overrides().unwrap_or_default();

        let rows = raw
            .rows
            .iter()
            .map(|row| {
                raw.fields
                    .iter()
                    .zip(row)
                    .map(|(field, value)| {
                        (
                            field.name.clone(),
                            overrides.decode(field.type_oid, value.as_deref()),
                        )
                    })
                    .collect()
            })
            .collect();

        Ok(QueryResult {
            fields: raw.fields,
            rows,
            row_count: raw.row_count,
        })
    }
}

impl fmt::Debug for BoundConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundConnection")
            .field("id", &self.raw.id())
            .finish()
    }
}

/// Per-unit-of-work context shared with interceptors.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Purpose of the unit of work.
    pub connection_type: ConnectionType,
    /// Span scoped to this connection.
    pub log: tracing::Span,
    /// Identifier of the owning pool.
    pub pool_id: PoolId,
}

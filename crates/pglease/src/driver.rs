//! Seams to the underlying driver and its socket-level pool.
//!
//! The wire protocol, socket pooling, and waiter queueing all live behind
//! these traits. The lifecycle only consumes them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::RawConnection;
use crate::error::DriverError;
use crate::type_overrides::TypeOverrides;

/// Description of one result column as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name.
    pub name: String,
    /// Backend type OID.
    pub type_oid: u32,
}

impl FieldDescription {
    /// Create a field description.
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }
}

/// Undecoded, text-format result of a single statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawQueryResult {
    /// Result columns.
    pub fields: Vec<FieldDescription>,
    /// Rows in text format; `None` is SQL `NULL`.
    pub rows: Vec<Vec<Option<String>>>,
    /// Number of rows affected or returned.
    pub row_count: u64,
}

/// A backend session owned by a raw connection.
#[async_trait]
pub trait NativeConnection: Send + Sync {
    /// Run one statement with positional parameters.
    async fn query(
        &self,
        sql: &str,
        values: &[serde_json::Value],
    ) -> Result<RawQueryResult, DriverError>;

    /// Hand the pool's type overrides to the session's own decoder, for
    /// drivers that decode rows natively.
    fn attach_type_overrides(&self, _overrides: Arc<TypeOverrides>) {}
}

/// The driver's connection pool.
///
/// Implementations own the live-connection set and the waiter queue.
#[async_trait]
pub trait DriverPool: Send + Sync {
    /// Request one connection.
    ///
    /// `Ok(None)` means the driver reported success without a usable handle.
    async fn connect(&self) -> Result<Option<RawConnection>, DriverError>;

    /// Remove a connection from the live set. Must be idempotent.
    fn remove(&self, connection: &RawConnection);

    /// Wake acquisition waiters so they can retry against the reduced pool.
    fn pulse_queue(&self);

    /// Shut the pool down.
    async fn end(&self) {}
}

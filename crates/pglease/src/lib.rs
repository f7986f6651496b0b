//! # pglease
//!
//! Connection acquisition and lifecycle orchestration for PostgreSQL client
//! pools.
//!
//! Every logical unit of work gets a freshly validated connection, runs a
//! caller-supplied handler against it, and then the connection is
//! terminated and removed from the pool. Connections are never reused across
//! units of work, so a caller that leaks or shares a handle cannot end up
//! sharing a backend session with someone else.
//!
//! ## Features
//!
//! - Bounded retry around the driver's connect operation
//! - Ordered interceptor hooks before acquisition, after acquisition, and
//!   before release
//! - Redirecting a unit of work to another pool from an interceptor
//! - Type-override resolution computed once per pool
//! - Classification of cancelled statements and terminated backends
//! - Unconditional recycling on success, failure, and cancellation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pglease::{ClientConfiguration, ConnectionType, Pool, create_connection};
//!
//! let pool = Arc::new(Pool::new(driver_pool));
//! let config = Arc::new(ClientConfiguration::new().connection_retry_limit(5));
//!
//! let rows = create_connection(
//!     &tracing::Span::current(),
//!     &pool,
//!     &config,
//!     ConnectionType::ImplicitQuery,
//!     |_log, _raw, bound, _config| async move {
//!         bound.query("SELECT id FROM users", &[]).await
//!     },
//!     |_alternate| async { unreachable!() },
//!     None,
//! )
//! .await?;
//! // The connection is already removed from the pool here.
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connect;
pub mod connection;
pub mod driver;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod pool;
pub mod type_overrides;

// Configuration
pub use config::ClientConfiguration;

// Error types
pub use error::{BoxError, DriverError, Error, Result};

// Connections
pub use connection::{
    BoundConnection, ConnectionContext, ConnectionId, ConnectionType, QueryResult, RawConnection,
    TerminationReason,
};

// Driver seams
pub use driver::{DriverPool, FieldDescription, NativeConnection, RawQueryResult};

// Interceptors
pub use interceptor::{Interceptor, PoolConnectionContext, Query};

// Lifecycle
pub use connect::establish_connection;
pub use lifecycle::create_connection;

// Pool types
pub use pool::{Pool, PoolId, PoolMetrics};

// Type overrides
pub use type_overrides::{TypeOverrides, TypeParser};

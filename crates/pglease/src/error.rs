//! Error types.
//!
//! Driver failures arrive as [`DriverError`] and are classified into
//! [`Error`] on conversion, so statements run through a bound connection
//! always surface as one of the taxonomy kinds.

use thiserror::Error;

/// SQLSTATE raised when a statement is cancelled (by another session or by
/// `statement_timeout`).
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// SQLSTATE raised when the backend is terminated by an administrator.
pub const SQLSTATE_ADMIN_SHUTDOWN: &str = "57P01";

const STATEMENT_TIMEOUT_MESSAGE: &str = "canceling statement due to statement timeout";

/// Boxed error for caller- and interceptor-defined failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A low-level failure reported by the underlying driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    /// SQLSTATE code, when the failure came from the backend.
    pub code: Option<String>,
    /// Driver or backend message.
    pub message: String,
}

impl DriverError {
    /// Create a driver error without a SQLSTATE code (socket errors,
    /// refused connections).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create a driver error carrying a SQLSTATE code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Get the SQLSTATE code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// Errors observed by callers of the connection lifecycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connect-attempt budget was exhausted.
    #[error("connection failed: {0}")]
    Connection(String),

    /// An internal invariant was violated.
    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    /// The running statement was cancelled by another session.
    #[error("statement cancelled: {0}")]
    QueryCancelled(#[source] DriverError),

    /// The running statement exceeded `statement_timeout`.
    ///
    /// Shares SQLSTATE `57014` with [`Error::QueryCancelled`] but is a
    /// separate variant; use [`Error::is_cancellation`] to match both.
    #[error("statement timeout: {0}")]
    StatementTimeout(#[source] DriverError),

    /// The backend session was terminated while a statement was running.
    #[error("backend terminated: {0}")]
    BackendTerminated(#[source] DriverError),

    /// Any other driver failure, unmodified.
    #[error(transparent)]
    Driver(DriverError),

    /// The pool was closed before a connection could be acquired.
    #[error("pool is closed")]
    PoolClosed,

    /// Client configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure raised by a handler or interceptor.
    #[error(transparent)]
    Other(BoxError),
}

impl Error {
    /// Wrap a handler- or interceptor-defined failure.
    pub fn other(error: impl Into<BoxError>) -> Self {
        Self::Other(error.into())
    }

    /// Check if this error is transient and the unit of work may succeed
    /// on a fresh connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::QueryCancelled(_)
                | Self::StatementTimeout(_)
                | Self::BackendTerminated(_)
        )
    }

    /// Check if the running statement was cancelled, either by another
    /// session or by `statement_timeout`.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::QueryCancelled(_) | Self::StatementTimeout(_))
    }

    /// Check if this error indicates a defect rather than an infrastructure
    /// failure.
    #[must_use]
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::UnexpectedState(_))
    }

    /// Get the underlying driver error, if this error carries one.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::QueryCancelled(e)
            | Self::StatementTimeout(e)
            | Self::BackendTerminated(e)
            | Self::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for Error {
    fn from(error: DriverError) -> Self {
        match error.code() {
            Some(SQLSTATE_ADMIN_SHUTDOWN) => Self::BackendTerminated(error),
            Some(SQLSTATE_QUERY_CANCELED) if error.message.contains(STATEMENT_TIMEOUT_MESSAGE) => {
                Self::StatementTimeout(error)
            }
            Some(SQLSTATE_QUERY_CANCELED) => Self::QueryCancelled(error),
            _ => Self::Driver(error),
        }
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

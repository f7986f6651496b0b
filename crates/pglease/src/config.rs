//! Client configuration.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::interceptor::Interceptor;
use crate::type_overrides::TypeParser;

/// Default number of connect attempts per unit of work.
pub const DEFAULT_CONNECTION_RETRY_LIMIT: u32 = 3;

/// Immutable settings read by the connection lifecycle.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Clone)]
#[non_exhaustive]
pub struct ClientConfiguration {
    /// Maximum number of connect attempts for one unit of work.
    pub connection_retry_limit: u32,

    /// Interceptors, invoked in this order at every lifecycle point.
    pub interceptors: Vec<Arc<dyn Interceptor>>,

    /// Value parsers keyed by backend type name.
    pub type_parsers: Vec<TypeParser>,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            connection_retry_limit: DEFAULT_CONNECTION_RETRY_LIMIT,
            interceptors: Vec::new(),
            type_parsers: Vec::new(),
        }
    }
}

impl ClientConfiguration {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect-attempt budget.
    #[must_use]
    pub fn connection_retry_limit(mut self, limit: u32) -> Self {
        self.connection_retry_limit = limit;
        self
    }

    /// Append an interceptor.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append a type parser.
    #[must_use]
    pub fn type_parser(mut self, parser: TypeParser) -> Self {
        self.type_parsers.push(parser);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.connection_retry_limit == 0 {
            return Err(Error::Configuration(
                "connection_retry_limit must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for parser in &self.type_parsers {
            if !seen.insert(parser.name()) {
                return Err(Error::Configuration(format!(
                    "duplicate type parser for {}",
                    parser.name()
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("connection_retry_limit", &self.connection_retry_limit)
            .field(
                "interceptors",
                &self.interceptors.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("type_parsers", &self.type_parsers)
            .finish()
    }
}

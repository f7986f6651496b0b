//! # pglease-testing
//!
//! Test infrastructure for the pglease connection lifecycle.
//!
//! This crate provides a scriptable mock driver pool so the lifecycle can be
//! exercised without a PostgreSQL server. It also hosts the lifecycle
//! integration tests, which keeps `pglease` free of a circular
//! dev-dependency.
//!
//! ## Features
//!
//! - Scripted connect failures and empty handles
//! - Canned statement responses, including cancellation and termination
//!   errors
//! - Live-connection tracking to assert that nothing is left idle
//! - A recording interceptor for ordering assertions
//!
//! ## Example
//!
//! ```rust,ignore
//! use pglease_testing::{MockDriverPool, MockResponse, TestPool};
//!
//! #[tokio::test]
//! async fn test_with_mock_driver() {
//!     let test = TestPool::new(
//!         MockDriverPool::builder()
//!             .fail_connects(2, "connection refused")
//!             .with_response("SELECT 1", MockResponse::scalar("n", 23, "1"))
//!             .build(),
//!     );
//!
//!     // Run create_connection against test.pool...
//!     assert!(test.driver.live_connections().is_empty());
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_driver;

pub use fixtures::{EventLog, HookPoint, RecordingInterceptor, TestPool, shared};
pub use mock_driver::{
    ConnectOutcome, ExecutedStatement, MockDriverBuilder, MockDriverPool, MockResponse,
    MockSession, MockType,
};

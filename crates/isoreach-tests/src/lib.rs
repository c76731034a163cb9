//! Integration test infrastructure for isoreach.
//!
//! Provides a [`TestContext`] with a temporary data root and an in-memory
//! cache, fixtures for origins and batches, and scripted fakes for every
//! external port.
//!
//! # Usage
//!
//! ```ignore
//! use isoreach_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     // Use ctx.cache, ctx.layout(), etc.
//! }
//! ```

pub mod context;
pub mod fakes;
pub mod fixtures;

pub use context::TestContext;
pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,isoreach=debug")),
        )
        .with_test_writer()
        .try_init();
}

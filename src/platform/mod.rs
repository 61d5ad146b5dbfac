//! Remote platform abstraction
//!
//! The engine only ever talks to the platform through [`RepositoryClient`]. The GitLab
//! implementation lives in [`crate::gitlab`]; [`mocks::InMemoryPlatform`] is the
//! deterministic stand-in used by tests.

pub mod errors;
pub mod mocks;
pub mod traits;
pub mod types;

pub use errors::PlatformError;
pub use traits::RepositoryClient;
#[cfg(any(test, feature = "testing"))]
pub use traits::MockRepositoryClient;
pub use types::*;

//! GitLab v4 REST implementation of the platform capability

pub mod client;
mod models;
pub mod retry;

pub use client::GitLabClient;
pub use retry::{RetryConfig, RetryHandler};

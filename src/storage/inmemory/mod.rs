//! In-memory storage implementations
//!
//! Suitable for development, tests and single-instance deployments that can
//! afford to lose registrations and tokens on restart.

mod oauth;

pub use oauth::MemoryOAuthStorage;

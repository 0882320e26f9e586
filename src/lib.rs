//! toolgate library crate.
//!
//! An OAuth 2.1 authorization server, a supervisor for one backend tool server process and an
//! authenticating JSON-RPC gateway that forwards tool calls to that backend.

pub mod audit;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod http;
pub mod oauth;
pub mod storage;
pub mod supervisor;
pub mod templates;

//! Axum HTTP server handlers and extractors for the OAuth, gateway and administration endpoints.

pub mod context;
mod handler_gateway;
mod handler_login;
mod handler_oauth;
mod handler_oauth_authorize;
mod handler_oauth_clients;
mod handler_process;
mod handler_well_known;
pub mod middleware_auth;
pub mod server;
mod utils_oauth;

pub use context::{AppEngine, AppState};
pub use server::build_router;

//! # Menubell Gateway
//! HTTP surface: the provider webhook plus the operator endpoints
//! schedulers and dashboards call.

pub mod routes;
pub mod server;

pub use server::{build_router, serve, AppState};

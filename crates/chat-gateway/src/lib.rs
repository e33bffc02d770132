//! Chat Gateway: streaming chat proxy and session-authentication gateway in
//! front of a chat backend.
//!
//! The gateway resolves who is calling, injects that verified identity into
//! the upstream request, and relays the upstream's event stream back to the
//! client as it is produced.

pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod stats;

pub use config::GatewayConfig;
pub use server::{build_router, AppState};

//! HTTP surface of the relay
//!
//! Room and stream routes, websocket upgrades for signaling, chat and viewer
//! feeds, and a health endpoint.

pub mod shared;
pub use shared::SharedState;

pub mod http_server;
pub use http_server::{build_router, run_http_server};

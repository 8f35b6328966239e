//! Vigil API crate - the HTTP controller boundary.
//!
//! Exposes intents, frame snapshots/streams, confirmation gates, the
//! kill switch, and health to operators over a loopback-only axum server.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;

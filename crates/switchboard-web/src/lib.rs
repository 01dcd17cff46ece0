//! HTTP surface of switchboard.
//!
//! Serves the message history, guild/channel metadata and the per-channel
//! cache as JSON, a live snapshot stream over SSE, and a small dashboard.

mod error;
mod routes;
mod sse;

pub use error::ApiError;
pub use routes::{AppState, create_router};

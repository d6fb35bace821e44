//! HTTP API server for external control
//!
//! This module provides a REST API for driving one streaming session:
//! - POST /session/start - Start a new session
//! - POST /session/stop - Stop the current session
//! - POST /session/languages - Change source/target languages
//! - POST /session/languages/swap - Swap source and target
//! - GET /session/status - Query session stats
//! - GET /session/transcript - Get accumulated transcript and translation
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

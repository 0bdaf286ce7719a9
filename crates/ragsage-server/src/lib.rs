//! RagSage server: HTTP API and interactive console around the chat pipeline.

pub mod console;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::{build_orchestrator, AppState};

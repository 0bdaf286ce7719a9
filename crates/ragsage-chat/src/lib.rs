//! RAG chat: context-grounded generation and the per-turn pipeline.
//!
//! [`ChatOrchestrator`] runs retrieval then generation for one message and
//! contains every failure except authentication and cancellation.

pub mod completion;
pub mod generation;
pub mod orchestrator;
pub mod types;

pub use completion::{CompletionAuth, CompletionBackend, CompletionError, CompletionRequest, HttpCompletionBackend};
pub use generation::{build_system_prompt, Cancelled, GenerationClient, GenerationOutcome};
pub use orchestrator::{ChatError, ChatOrchestrator, ORCHESTRATOR_APOLOGY};
pub use types::*;

//! RagSage Core — configuration, shared data model, error types.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AgentConfig, AuthMode, ChatSettings, FoundryOptions, Microsoft365Options};
pub use error::{Error, Result};
pub use types::RetrievedContent;

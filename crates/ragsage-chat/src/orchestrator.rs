//! Per-turn pipeline: retrieve, generate, assemble.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use ragsage_auth::{AuthContext, AuthError};
use ragsage_retrieval::{RetrievalClient, RetrievalError, SearchOutcome};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::generation::{Cancelled, GenerationClient};
use crate::types::{ChatRequest, ChatResponse};

pub const ORCHESTRATOR_APOLOGY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";

/// Failures that reach the caller of [`ChatOrchestrator::process`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error(transparent)]
    Auth(AuthError),

    #[error("Chat turn cancelled")]
    Cancelled,
}

impl From<RetrievalError> for ChatError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Unauthorized(e) | RetrievalError::Auth(e) => ChatError::Auth(e),
            RetrievalError::Cancelled => ChatError::Cancelled,
        }
    }
}

impl From<Cancelled> for ChatError {
    fn from(_: Cancelled) -> Self {
        ChatError::Cancelled
    }
}

pub struct ChatOrchestrator {
    retrieval: RetrievalClient,
    generation: GenerationClient,
}

impl ChatOrchestrator {
    pub fn new(retrieval: RetrievalClient, generation: GenerationClient) -> Self {
        Self {
            retrieval,
            generation,
        }
    }

    /// Answer one message. Panics inside the pipeline become an apology response.
    pub async fn process(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        info!("Processing chat message: {}", request.message);

        match AssertUnwindSafe(self.run(request, cancel)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Error occurred while processing chat message: {}", detail);
                Ok(ChatResponse::new(ORCHESTRATOR_APOLOGY, Vec::new()))
            }
        }
    }

    async fn run(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse, ChatError> {
        let auth = AuthContext::from(request.access_token.clone());

        let outcome = self.retrieval.search(&request.message, &auth, cancel).await?;
        if let SearchOutcome::Degraded { reason } = &outcome {
            warn!("Retrieval degraded, answering without context: {}", reason);
        }
        let sources = outcome.into_contents();

        let generated = self
            .generation
            .generate(&request.message, &sources, cancel)
            .await?;

        Ok(ChatResponse::new(generated.into_text(), sources))
    }
}

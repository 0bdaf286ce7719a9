//! Shared application state.

use std::sync::Arc;

use ragsage_auth::TokenProvider;
use ragsage_chat::{ChatOrchestrator, GenerationClient, HttpCompletionBackend};
use ragsage_core::AgentConfig;
use ragsage_retrieval::RetrievalClient;

/// State shared by all route handlers. Immutable after startup.
pub struct AppState {
    pub config: AgentConfig,
    pub orchestrator: ChatOrchestrator,
}

impl AppState {
    pub fn new(config: AgentConfig, orchestrator: ChatOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Wire the production pipeline from configuration.
    pub fn from_config(config: AgentConfig) -> ragsage_core::Result<Self> {
        let tokens = Arc::new(TokenProvider::from_options(&config.microsoft365));
        let orchestrator = build_orchestrator(&config, tokens)?;
        Ok(Self::new(config, orchestrator))
    }

    pub fn allow_anonymous_requests(&self) -> bool {
        self.config.microsoft365.allow_anonymous_requests
    }
}

/// Retrieval with `tokens`, generation against the configured completion backend.
pub fn build_orchestrator(
    config: &AgentConfig,
    tokens: Arc<TokenProvider>,
) -> ragsage_core::Result<ChatOrchestrator> {
    let retrieval = RetrievalClient::new(&config.microsoft365, &config.chat, tokens);
    let backend = HttpCompletionBackend::from_config(config)?;
    let generation = GenerationClient::new(
        Arc::new(backend),
        config.foundry.model_name.clone(),
        &config.chat,
    );
    Ok(ChatOrchestrator::new(retrieval, generation))
}

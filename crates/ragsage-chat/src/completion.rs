//! Chat-completion backends.
//!
//! The HTTP backend speaks the OpenAI-compatible chat-completions format used
//! by the Azure AI inference API, authenticating with either an API key or a
//! bearer token from a non-interactive [`TokenProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use ragsage_auth::{bearer_header, AuthContext, AuthError, TokenProvider};
use ragsage_core::AgentConfig;
use reqwest::Client;
use secrecy::SecretString;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One completion call: a system block and the raw user message.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid completion response: {0}")]
    Parse(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Something that turns a [`CompletionRequest`] into answer text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// `Ok(None)` when the backend answered without content.
    async fn complete(&self, request: &CompletionRequest) -> Result<Option<String>, CompletionError>;
}

/// How the HTTP backend authenticates.
#[derive(Clone)]
pub enum CompletionAuth {
    ApiKey(SecretString),
    Token(Arc<TokenProvider>),
}

impl std::fmt::Debug for CompletionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionAuth::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            CompletionAuth::Token(provider) => f.debug_tuple("Token").field(provider).finish(),
        }
    }
}

/// OpenAI-compatible chat-completions endpoint.
pub struct HttpCompletionBackend {
    http: Client,
    url: String,
    auth: CompletionAuth,
}

impl HttpCompletionBackend {
    pub fn new(url: impl Into<String>, auth: CompletionAuth) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            auth,
        }
    }

    /// API key when configured, otherwise a managed-identity style token for
    /// the AI inference scope.
    pub fn from_config(config: &AgentConfig) -> ragsage_core::Result<Self> {
        let url = config.foundry.completions_url()?;
        let auth = match &config.foundry.api_key {
            Some(key) => CompletionAuth::ApiKey(key.clone()),
            None => CompletionAuth::Token(Arc::new(TokenProvider::for_inference(&config.microsoft365))),
        };
        info!("Completion backend: {}", url);
        Ok(Self::new(url, auth))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn authorization(&self) -> Result<String, CompletionError> {
        match &self.auth {
            CompletionAuth::ApiKey(key) => Ok(bearer_header(key)),
            CompletionAuth::Token(provider) => {
                // Dropping the completion future is how callers cancel.
                let never = CancellationToken::new();
                let token = provider.get_token(&AuthContext::none(), &never).await?;
                Ok(bearer_header(&token))
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Option<String>, CompletionError> {
        let body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        debug!("Requesting completion from {} with model {}", self.url, request.model);

        let response = self
            .http
            .post(&self.url)
            .header("Authorization", self.authorization().await?)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Parse(e.to_string()))?;

        Ok(parsed["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragsage_core::FoundryOptions;

    #[test]
    fn test_from_config_prefers_api_key() {
        let config = AgentConfig {
            foundry: FoundryOptions {
                project_endpoint: "https://proj.services.ai.azure.com/api/projects/p1".into(),
                model_name: "gpt-4o".into(),
                api_key: Some(SecretString::new("sk-test".into())),
                ..Default::default()
            },
            ..Default::default()
        };

        let backend = HttpCompletionBackend::from_config(&config).unwrap();
        assert!(matches!(backend.auth, CompletionAuth::ApiKey(_)));
        assert_eq!(
            backend.url(),
            "https://proj.services.ai.azure.com/models/chat/completions?api-version=2024-05-01-preview"
        );
        assert!(!format!("{:?}", backend.auth).contains("sk-test"));
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        assert!(HttpCompletionBackend::from_config(&AgentConfig::default()).is_err());
    }
}

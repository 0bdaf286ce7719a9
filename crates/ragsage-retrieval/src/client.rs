//! Retrieval client.

use std::sync::Arc;

use ragsage_auth::{bearer_header, AuthContext, AuthError, TokenProvider};
use ragsage_core::{ChatSettings, Microsoft365Options, RetrievedContent};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RetrievalError;
use crate::query::{RetrievalQuery, RetrievalResponse};

const BACKEND_NAME: &str = "retrieval service";

/// Result of a search that did not hard-fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The backend answered; the list may be empty.
    Found(Vec<RetrievedContent>),
    /// The backend could not be used; no content.
    Degraded { reason: String },
}

impl SearchOutcome {
    pub fn contents(&self) -> &[RetrievedContent] {
        match self {
            SearchOutcome::Found(items) => items,
            SearchOutcome::Degraded { .. } => &[],
        }
    }

    pub fn into_contents(self) -> Vec<RetrievedContent> {
        match self {
            SearchOutcome::Found(items) => items,
            SearchOutcome::Degraded { .. } => Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SearchOutcome::Degraded { .. })
    }
}

/// Client for the Copilot retrieval endpoint.
pub struct RetrievalClient {
    http: Client,
    endpoint: String,
    filter_expression: String,
    top_k: u32,
    tokens: Arc<TokenProvider>,
}

impl RetrievalClient {
    pub fn new(options: &Microsoft365Options, chat: &ChatSettings, tokens: Arc<TokenProvider>) -> Self {
        Self::with_http(Client::new(), options, chat, tokens)
    }

    pub fn with_http(
        http: Client,
        options: &Microsoft365Options,
        chat: &ChatSettings,
        tokens: Arc<TokenProvider>,
    ) -> Self {
        Self {
            http,
            endpoint: options.copilot_retrieval_endpoint.clone(),
            filter_expression: options.filter_expression.clone(),
            top_k: chat.top_k,
            tokens,
        }
    }

    pub fn build_query(&self, query: &str) -> RetrievalQuery {
        RetrievalQuery::new(query, self.filter_expression.clone(), self.top_k)
    }

    /// Search for content relevant to `query`.
    pub async fn search(
        &self,
        query: &str,
        auth: &AuthContext,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, RetrievalError> {
        info!("Searching for query: {}", query);

        let token = self.tokens.get_token(auth, cancel).await?;
        let body = self.build_query(query);

        let request = self
            .http
            .post(&self.endpoint)
            .header("Authorization", bearer_header(&token))
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            result = request => result,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!("Retrieval request to {} failed: {}", self.endpoint, e);
                return Ok(SearchOutcome::Degraded {
                    reason: format!("request failed: {}", e),
                });
            }
        };

        let status = response.status();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            result = response.text() => result,
        };

        if status == StatusCode::UNAUTHORIZED {
            warn!("Retrieval API rejected the access token (401)");
            return Err(RetrievalError::Unauthorized(AuthError::TokenRejected {
                backend: BACKEND_NAME.to_string(),
            }));
        }

        if !status.is_success() {
            error!(
                "Retrieval API call failed with status: {}, Error: {}",
                status,
                text.as_deref().unwrap_or_default()
            );
            return Ok(SearchOutcome::Degraded {
                reason: format!("retrieval API returned {}", status),
            });
        }

        let text = match text {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to read retrieval response: {}", e);
                return Ok(SearchOutcome::Degraded {
                    reason: format!("failed to read response: {}", e),
                });
            }
        };

        match serde_json::from_str::<RetrievalResponse>(&text) {
            Ok(parsed) => {
                let contents = parsed.into_contents();
                info!("Retrieved {} items", contents.len());
                Ok(SearchOutcome::Found(contents))
            }
            Err(e) => {
                error!("Failed to parse retrieval response: {}", e);
                Ok(SearchOutcome::Degraded {
                    reason: format!("malformed response: {}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_contents() {
        let item = RetrievedContent {
            title: "t".into(),
            content: "c".into(),
            url: String::new(),
            source: "SharePoint".into(),
        };
        let found = SearchOutcome::Found(vec![item.clone()]);
        assert_eq!(found.contents(), &[item]);
        assert!(!found.is_degraded());

        let degraded = SearchOutcome::Degraded {
            reason: "status 500".into(),
        };
        assert!(degraded.contents().is_empty());
        assert!(degraded.into_contents().is_empty());
    }
}

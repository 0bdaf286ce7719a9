//! Chat types for the HTTP and console surfaces.

use chrono::{DateTime, Utc};
use ragsage_core::RetrievedContent;
use serde::{Deserialize, Serialize};

/// Incoming chat message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Token already held by the caller; used instead of the credential chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Caller supplied a non-empty token.
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Answer for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    /// Content used as grounding, in retrieval order.
    pub sources: Vec<RetrievedContent>,
    pub timestamp: DateTime<Utc>,
}

impl ChatResponse {
    pub fn new(response: impl Into<String>, sources: Vec<RetrievedContent>) -> Self {
        Self {
            response: response.into(),
            sources,
            timestamp: Utc::now(),
        }
    }
}

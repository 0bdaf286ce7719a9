//! Data model shared by retrieval, generation and the HTTP surface.

use serde::{Deserialize, Serialize};

/// A normalized retrieval hit used as grounding context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedContent {
    pub title: String,
    /// Extract texts joined with `\n`.
    pub content: String,
    /// Empty when the hit carried no URL.
    pub url: String,
    pub source: String,
}

impl RetrievedContent {
    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }
}

//! Retrieval API wire format.

use ragsage_core::RetrievedContent;
use serde::{Deserialize, Serialize};

pub const DATASOURCE_SHAREPOINT: &str = "sharepoint";
pub const RESOURCE_METADATA: [&str; 3] = ["title", "author", "lastModifiedDateTime"];
pub const UNKNOWN_TITLE: &str = "Unknown";
pub const SOURCE_LABEL: &str = "SharePoint";

/// Search request body. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalQuery {
    pub query_string: String,
    pub datasource: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filter_expression: String,
    pub maximum_number_of_results: u32,
    pub resource_metadata: Vec<String>,
}

impl RetrievalQuery {
    pub fn new(query: impl Into<String>, filter_expression: impl Into<String>, max_results: u32) -> Self {
        Self {
            query_string: query.into(),
            datasource: DATASOURCE_SHAREPOINT.to_string(),
            filter_expression: filter_expression.into(),
            maximum_number_of_results: max_results,
            resource_metadata: RESOURCE_METADATA.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RetrievalResponse {
    #[serde(default)]
    pub retrieval_hits: Option<Vec<RetrievalHit>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RetrievalHit {
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub extracts: Option<Vec<TextExtract>>,
    #[serde(default)]
    #[allow(dead_code)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_metadata: Option<ResourceMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextExtract {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResourceMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub author: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub last_modified_date_time: Option<String>,
}

impl RetrievalHit {
    pub fn into_content(self) -> RetrievedContent {
        let content = self
            .extracts
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.text)
            .collect::<Vec<_>>()
            .join("\n");

        RetrievedContent {
            title: self
                .resource_metadata
                .and_then(|m| m.title)
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            content,
            url: self.web_url.unwrap_or_default(),
            source: SOURCE_LABEL.to_string(),
        }
    }
}

impl RetrievalResponse {
    pub fn into_contents(self) -> Vec<RetrievedContent> {
        self.retrieval_hits
            .unwrap_or_default()
            .into_iter()
            .map(RetrievalHit::into_content)
            .collect()
    }
}

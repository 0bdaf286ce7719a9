//! Context-grounded answer generation.

use std::fmt::Write;
use std::sync::Arc;

use ragsage_core::{ChatSettings, RetrievedContent};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::completion::{CompletionBackend, CompletionRequest};

pub const EMPTY_COMPLETION_APOLOGY: &str =
    "I apologize, but I couldn't generate a response at this time.";
pub const GENERATION_ERROR_APOLOGY: &str =
    "I apologize, but an error occurred while processing your request.";

/// The only way a generation call ends without answer text.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Generation cancelled")]
pub struct Cancelled;

/// What came back from the completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Answer(String),
    /// Backend returned no content.
    Empty,
    /// Backend call failed; `error` is for logs only.
    Failed { error: String },
}

impl GenerationOutcome {
    /// User-facing text: the answer or a fixed apology.
    pub fn text(&self) -> &str {
        match self {
            GenerationOutcome::Answer(text) => text,
            GenerationOutcome::Empty => EMPTY_COMPLETION_APOLOGY,
            GenerationOutcome::Failed { .. } => GENERATION_ERROR_APOLOGY,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            GenerationOutcome::Answer(text) => text,
            other => other.text().to_string(),
        }
    }
}

/// System block grounding the model in `context`.
pub fn build_system_prompt(context: &[RetrievedContent]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a helpful assistant that answers questions based on the provided context from Microsoft 365 content.\n",
    );
    prompt.push_str(
        "Use the following retrieved content to answer the user's question. If the context doesn't contain relevant information, say so clearly.\n",
    );
    prompt.push('\n');
    prompt.push_str("Retrieved Context:\n");

    for item in context {
        let _ = writeln!(prompt, "Source: {} ({})", item.title, item.source);
        let _ = writeln!(prompt, "Content: {}", item.content);
        if item.has_url() {
            let _ = writeln!(prompt, "URL: {}", item.url);
        }
        prompt.push('\n');
    }

    prompt.push_str("Instructions:\n");
    prompt.push_str("- Answer based on the provided context\n");
    prompt.push_str("- Be concise and accurate\n");
    prompt.push_str("- If asked about sources, reference the titles and URLs provided\n");
    prompt.push_str("- If the context doesn't contain enough information, be honest about limitations\n");
    prompt
}

pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, model: impl Into<String>, settings: &ChatSettings) -> Self {
        Self {
            backend,
            model: model.into(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    /// Answer `user_message` from `context`. Backend failures become apologies.
    pub async fn generate(
        &self,
        user_message: &str,
        context: &[RetrievedContent],
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, Cancelled> {
        info!(
            "Generating response for user message with {} context items",
            context.len()
        );

        let request = CompletionRequest {
            system: build_system_prompt(context),
            user: user_message.to_string(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            result = self.backend.complete(&request) => result,
        };

        Ok(match result {
            Ok(Some(text)) => {
                info!("Successfully generated response");
                GenerationOutcome::Answer(text)
            }
            Ok(None) => {
                warn!("Completion backend returned no content");
                GenerationOutcome::Empty
            }
            Err(e) => {
                error!("Error occurred while generating response: {}", e);
                GenerationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        reply: Result<Option<String>, String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionBackend for Recorder {
        async fn complete(&self, request: &CompletionRequest) -> Result<Option<String>, CompletionError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map_err(CompletionError::Parse)
        }
    }

    fn item(title: &str, content: &str, url: &str) -> RetrievedContent {
        RetrievedContent {
            title: title.into(),
            content: content.into(),
            url: url.into(),
            source: "SharePoint".into(),
        }
    }

    fn client(reply: Result<Option<String>, String>) -> (GenerationClient, Arc<Recorder>) {
        let backend = Arc::new(Recorder {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        (
            GenerationClient::new(backend.clone(), "gpt-4o", &ChatSettings::default()),
            backend,
        )
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_system_prompt(&[
            item("Vacation Policy", "20 days", "https://contoso/v.docx"),
            item("Unknown", "orphan", ""),
        ]);

        assert!(prompt.starts_with(
            "You are a helpful assistant that answers questions based on the provided context from Microsoft 365 content.\n"
        ));
        assert!(prompt.contains(
            "\nRetrieved Context:\nSource: Vacation Policy (SharePoint)\nContent: 20 days\nURL: https://contoso/v.docx\n\n"
        ));
        assert!(prompt.contains("Source: Unknown (SharePoint)\nContent: orphan\n\nInstructions:\n"));
        assert_eq!(prompt.matches("URL:").count(), 1);
        assert!(prompt.ends_with(
            "- If the context doesn't contain enough information, be honest about limitations\n"
        ));
    }

    #[test]
    fn test_prompt_with_empty_context() {
        let prompt = build_system_prompt(&[]);
        assert!(prompt.contains("Retrieved Context:\nInstructions:\n"));
        assert!(!prompt.contains("Source:"));
    }

    #[tokio::test]
    async fn test_request_carries_settings_and_raw_message() {
        let (gen, backend) = client(Ok(Some("answer".into())));
        let outcome = gen
            .generate("What is X?", &[item("T", "C", "")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, GenerationOutcome::Answer("answer".into()));
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].user, "What is X?");
        assert_eq!(seen[0].model, "gpt-4o");
        assert_eq!(seen[0].max_tokens, 1000);
        assert!(seen[0].system.contains("Source: T (SharePoint)"));
    }

    #[tokio::test]
    async fn test_empty_completion_apologizes() {
        let (gen, _) = client(Ok(None));
        let outcome = gen.generate("q", &[], &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Empty);
        assert_eq!(
            outcome.into_text(),
            "I apologize, but I couldn't generate a response at this time."
        );
    }

    #[tokio::test]
    async fn test_backend_error_apologizes() {
        let (gen, _) = client(Err("boom".into()));
        let outcome = gen.generate("q", &[], &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Failed { .. }));
        assert_eq!(
            outcome.text(),
            "I apologize, but an error occurred while processing your request."
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_completion() {
        let (gen, backend) = client(Ok(Some("late".into())));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(gen.generate("q", &[], &cancel).await, Err(Cancelled));
        assert!(backend.seen.lock().unwrap().is_empty());
    }
}

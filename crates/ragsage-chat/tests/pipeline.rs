//! Full turn: mocked retrieval endpoint plus in-process or mocked completion backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ragsage_auth::{AuthError, CredentialOptions, DeviceCodePrompt, TokenProvider};
use ragsage_chat::{
    ChatError, ChatOrchestrator, ChatRequest, CompletionAuth, CompletionBackend, CompletionError,
    CompletionRequest, GenerationClient, HttpCompletionBackend, ORCHESTRATOR_APOLOGY,
};
use ragsage_core::{ChatSettings, Microsoft365Options};
use ragsage_retrieval::RetrievalClient;
use secrecy::SecretString;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Scripted {
    reply: Option<String>,
    seen: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl CompletionBackend for Scripted {
    async fn complete(&self, request: &CompletionRequest) -> Result<Option<String>, CompletionError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }
}

struct Exploding;

#[async_trait]
impl CompletionBackend for Exploding {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Option<String>, CompletionError> {
        panic!("completion backend blew up");
    }
}

/// Never answers on its own; only cancellation ends the call.
struct Stalled {
    started: AtomicBool,
}

#[async_trait]
impl CompletionBackend for Stalled {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Option<String>, CompletionError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Some("too late".into()))
    }
}

fn external_only_provider() -> Arc<TokenProvider> {
    let options = CredentialOptions {
        tenant_id: String::new(),
        client_id: String::new(),
        authority_host: "https://login.microsoftonline.com".into(),
        http: reqwest::Client::new(),
        browser: None,
        device_code_prompt: DeviceCodePrompt::silent(),
        env: Arc::new(|_| None),
    };
    Arc::new(TokenProvider::from_chain(Vec::new(), &options, &[]))
}

fn orchestrator(server: &MockServer, backend: Arc<dyn CompletionBackend>) -> ChatOrchestrator {
    let options = Microsoft365Options {
        copilot_retrieval_endpoint: format!("{}/retrieval", server.uri()),
        ..Default::default()
    };
    let settings = ChatSettings::default();
    ChatOrchestrator::new(
        RetrievalClient::new(&options, &settings, external_only_provider()),
        GenerationClient::new(backend, "gpt-4o", &settings),
    )
}

fn scripted(reply: Option<&str>) -> Arc<Scripted> {
    Arc::new(Scripted {
        reply: reply.map(str::to_string),
        seen: Mutex::new(Vec::new()),
    })
}

fn request() -> ChatRequest {
    ChatRequest::new("What is our vacation policy?").with_access_token("abc123")
}

#[tokio::test]
async fn test_answer_with_sources() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieval"))
        .and(header("Authorization", "Bearer abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "retrievalHits": [
                {
                    "webUrl": "https://contoso.sharepoint.com/Vacation.docx",
                    "extracts": [{"text": "20 days per year"}],
                    "resourceMetadata": {"title": "Vacation Policy"}
                },
                {
                    "webUrl": "https://contoso.sharepoint.com/Holidays.docx",
                    "extracts": [{"text": "Holidays list"}],
                    "resourceMetadata": {"title": "Holidays"}
                }
            ]
        })))
        .mount(&server)
        .await;

    let backend = scripted(Some("You get 20 days."));
    let start = Utc::now();
    let response = orchestrator(&server, backend.clone())
        .process(&request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.response, "You get 20 days.");
    assert!(response.timestamp >= start);
    assert_eq!(response.sources.len(), 2);
    assert_eq!(response.sources[0].title, "Vacation Policy");

    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].system.contains("Source: Vacation Policy (SharePoint)"));
    assert!(seen[0].system.contains("Source: Holidays (SharePoint)"));
    assert_eq!(seen[0].user, "What is our vacation policy?");
}

#[tokio::test]
async fn test_retrieval_outage_still_answers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = scripted(Some("I could not find anything relevant."));
    let start = Utc::now();
    let response = orchestrator(&server, backend.clone())
        .process(&request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.response, "I could not find anything relevant.");
    assert!(response.timestamp >= start);
    assert!(response.sources.is_empty());
    let seen = backend.seen.lock().unwrap();
    assert!(seen[0].system.contains("Retrieved Context:\nInstructions:"));
}

#[tokio::test]
async fn test_rejected_token_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let backend = scripted(Some("unused"));
    let err = orchestrator(&server, backend.clone())
        .process(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Auth(AuthError::TokenRejected { .. })));
    assert!(backend.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_credential_is_auth_error() {
    let server = MockServer::start().await;

    let err = orchestrator(&server, scripted(Some("unused")))
        .process(&ChatRequest::new("hello"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Auth(AuthError::AcquisitionFailed { .. })));
}

#[tokio::test]
async fn test_panic_becomes_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "retrievalHits": [{"extracts": [{"text": "x"}]}]
        })))
        .mount(&server)
        .await;

    let start = Utc::now();
    let response = orchestrator(&server, Arc::new(Exploding))
        .process(&request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.response, ORCHESTRATOR_APOLOGY);
    assert!(response.sources.is_empty());
    assert!(response.timestamp >= start);
}

#[tokio::test]
async fn test_cancelled_turn() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator(&server, scripted(Some("unused")))
        .process(&request(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, ChatError::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "retrievalHits": [{"extracts": [{"text": "x"}]}]
        })))
        .mount(&server)
        .await;

    let backend = Arc::new(Stalled {
        started: AtomicBool::new(false),
    });
    let orchestrator = orchestrator(&server, backend.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let watched = backend.clone();
    tokio::spawn(async move {
        while !watched.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), orchestrator.process(&request(), &cancel))
        .await
        .expect("generation should stop once cancelled")
        .unwrap_err();

    assert_eq!(err, ChatError::Cancelled);
    assert!(backend.started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_http_backend_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "max_tokens": 1000,
            "temperature": 0.7,
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello there"},
                "finish_reason": "stop"
            }]
        })))
        .mount(&server)
        .await;

    let backend = HttpCompletionBackend::new(
        format!("{}/models/chat/completions", server.uri()),
        CompletionAuth::ApiKey(SecretString::new("sk-test".into())),
    );
    let text = backend
        .complete(&CompletionRequest {
            system: "sys".into(),
            user: "hi".into(),
            model: "gpt-4o".into(),
            max_tokens: 1000,
            temperature: 0.7,
        })
        .await
        .unwrap();

    assert_eq!(text.as_deref(), Some("Hello there"));
}

#[tokio::test]
async fn test_http_backend_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let backend = HttpCompletionBackend::new(
        server.uri(),
        CompletionAuth::ApiKey(SecretString::new("sk-test".into())),
    );
    let err = backend
        .complete(&CompletionRequest {
            system: "sys".into(),
            user: "hi".into(),
            model: "gpt-4o".into(),
            max_tokens: 10,
            temperature: 0.0,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CompletionError::Status { status: 429, .. }));
}

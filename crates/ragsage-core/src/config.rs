//! Configuration loading: `appsettings.json` sections plus environment overrides.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "appsettings.json";
pub const DEFAULT_RETRIEVAL_ENDPOINT: &str = "https://graph.microsoft.com/beta/copilot/retrieval";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://graph.microsoft.com/Files.Read.All",
    "https://graph.microsoft.com/Sites.Read.All",
];
pub const DEFAULT_PORT: u16 = 5000;

/// How the agent obtains credentials for backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Live user sign-in: interactive browser, then device code.
    Delegated,
    /// No user interaction: environment client secret, then managed identity.
    Managed,
}

/// `AzureAIFoundry` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FoundryOptions {
    pub project_endpoint: String,
    pub model_name: String,
    /// Full chat-completions URL; derived from `ProjectEndpoint` when empty.
    pub inference_endpoint: String,
    /// API key for OpenAI-compatible endpoints. Credential-based auth is used when absent.
    pub api_key: Option<SecretString>,
}

impl FoundryOptions {
    /// Resolve the chat-completions URL for this deployment.
    pub fn completions_url(&self) -> Result<String> {
        if !self.inference_endpoint.is_empty() {
            return Ok(self.inference_endpoint.clone());
        }
        if self.project_endpoint.is_empty() {
            return Err(Error::Config(
                "AzureAIFoundry:ProjectEndpoint or AzureAIFoundry:InferenceEndpoint must be set".into(),
            ));
        }

        // Keep scheme and authority only; the inference API lives at /models.
        let endpoint = self.project_endpoint.trim_end_matches('/');
        let authority_end = endpoint
            .find("://")
            .map(|scheme_end| {
                let rest = &endpoint[scheme_end + 3..];
                scheme_end + 3 + rest.find('/').unwrap_or(rest.len())
            })
            .ok_or_else(|| {
                Error::Config(format!("Invalid AzureAIFoundry:ProjectEndpoint: {}", endpoint))
            })?;

        Ok(format!(
            "{}/models/chat/completions?api-version=2024-05-01-preview",
            &endpoint[..authority_end]
        ))
    }
}

/// `Microsoft365` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Microsoft365Options {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_retrieval_endpoint")]
    pub copilot_retrieval_endpoint: String,
    #[serde(default)]
    pub filter_expression: String,
    #[serde(default = "default_true")]
    pub use_user_authentication: bool,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub allow_anonymous_requests: bool,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
}

fn default_retrieval_endpoint() -> String {
    DEFAULT_RETRIEVAL_ENDPOINT.into()
}
fn default_true() -> bool {
    true
}
fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}
fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.into()
}

impl Default for Microsoft365Options {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            copilot_retrieval_endpoint: default_retrieval_endpoint(),
            filter_expression: String::new(),
            use_user_authentication: true,
            scopes: default_scopes(),
            allow_anonymous_requests: false,
            authority_host: default_authority_host(),
        }
    }
}

impl Microsoft365Options {
    pub fn auth_mode(&self) -> AuthMode {
        if self.use_user_authentication {
            AuthMode::Delegated
        } else {
            AuthMode::Managed
        }
    }
}

/// `ChatSettings` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatSettings {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_k() -> u32 {
    5
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_k: default_top_k(),
        }
    }
}

/// Top-level RagSage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(rename = "AzureAIFoundry", default)]
    pub foundry: FoundryOptions,
    #[serde(rename = "Microsoft365", default)]
    pub microsoft365: Microsoft365Options,
    #[serde(rename = "ChatSettings", default)]
    pub chat: ChatSettings,
    /// HTTP server port.
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            foundry: FoundryOptions::default(),
            microsoft365: Microsoft365Options::default(),
            chat: ChatSettings::default(),
            port: DEFAULT_PORT,
        }
    }
}

impl AgentConfig {
    /// Resolve the settings file: `RAGSAGE_CONFIG`, else `appsettings.json` in the working directory.
    pub fn resolve_path() -> PathBuf {
        std::env::var("RAGSAGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from file, then apply process environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a settings file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config: AgentConfig = serde_json::from_str(&raw).map_err(|e| {
                    Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file {} not found, using defaults and environment",
                    path.display()
                );
                Ok(AgentConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RAGSAGE_TENANT_ID") {
            self.microsoft365.tenant_id = v;
        }
        if let Some(v) = lookup("RAGSAGE_CLIENT_ID") {
            self.microsoft365.client_id = v;
        }
        if let Some(v) = lookup("RAGSAGE_RETRIEVAL_ENDPOINT") {
            self.microsoft365.copilot_retrieval_endpoint = v;
        }
        if let Some(v) = lookup("RAGSAGE_PROJECT_ENDPOINT") {
            self.foundry.project_endpoint = v;
        }
        if let Some(v) = lookup("RAGSAGE_MODEL_NAME") {
            self.foundry.model_name = v;
        }
        if self.foundry.api_key.is_none() {
            self.foundry.api_key = lookup("RAGSAGE_OPENAI_API_KEY").map(SecretString::new);
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }
}

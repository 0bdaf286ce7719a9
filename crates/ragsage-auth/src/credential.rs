//! Credential strategies and the ordered chain they are selected from.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ragsage_core::{AuthMode, Microsoft365Options};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device_code::{DeviceCodeCredential, DeviceCodePrompt};
use crate::environment::EnvironmentCredential;
use crate::error::{AuthError, CredentialError};
use crate::interactive::{BrowserLauncher, InteractiveBrowserCredential};
use crate::managed_identity::ManagedIdentityCredential;
use crate::token::AccessToken;

/// Uniform "acquire a token" capability shared by every strategy.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &'static str;

    /// Acquire a token for `scopes`. May block on user interaction.
    async fn get_token(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<AccessToken, CredentialError>;
}

/// Named credential strategies, tried in order at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    InteractiveBrowser,
    DeviceCode,
    Environment,
    ManagedIdentity,
}

const DELEGATED_CHAIN: &[CredentialKind] =
    &[CredentialKind::InteractiveBrowser, CredentialKind::DeviceCode];
const MANAGED_CHAIN: &[CredentialKind] =
    &[CredentialKind::Environment, CredentialKind::ManagedIdentity];

impl CredentialKind {
    /// The fallback chain for an authentication mode.
    pub fn chain_for(mode: AuthMode) -> &'static [CredentialKind] {
        match mode {
            AuthMode::Delegated => DELEGATED_CHAIN,
            AuthMode::Managed => MANAGED_CHAIN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CredentialKind::InteractiveBrowser => "interactive_browser",
            CredentialKind::DeviceCode => "device_code",
            CredentialKind::Environment => "environment",
            CredentialKind::ManagedIdentity => "managed_identity",
        }
    }

    /// Construct this strategy. Fails when its prerequisites are missing.
    pub fn build(self, options: &CredentialOptions) -> Result<Arc<dyn TokenCredential>, CredentialError> {
        Ok(match self {
            CredentialKind::InteractiveBrowser => {
                Arc::new(InteractiveBrowserCredential::new(options)?)
            }
            CredentialKind::DeviceCode => Arc::new(DeviceCodeCredential::new(options)?),
            CredentialKind::Environment => Arc::new(EnvironmentCredential::new(options)?),
            CredentialKind::ManagedIdentity => Arc::new(ManagedIdentityCredential::new(options)?),
        })
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs shared by all strategies.
#[derive(Clone)]
pub struct CredentialOptions {
    pub tenant_id: String,
    pub client_id: String,
    pub authority_host: String,
    pub http: Client,
    /// Browser used by the interactive flow; `None` means no browser is available.
    pub browser: Option<BrowserLauncher>,
    pub device_code_prompt: DeviceCodePrompt,
    /// Environment lookup used by the environment and managed identity strategies.
    pub env: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl CredentialOptions {
    /// Options for the process environment.
    pub fn from_microsoft365(options: &Microsoft365Options) -> Self {
        Self {
            tenant_id: options.tenant_id.clone(),
            client_id: options.client_id.clone(),
            authority_host: options.authority_host.clone(),
            http: Client::new(),
            browser: BrowserLauncher::detect(),
            device_code_prompt: DeviceCodePrompt::console(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }
}

impl fmt::Debug for CredentialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialOptions")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("authority_host", &self.authority_host)
            .field("browser", &self.browser)
            .finish()
    }
}

/// Build the first strategy in `chain` that constructs successfully.
pub fn build_credential(
    options: &CredentialOptions,
    chain: &[CredentialKind],
) -> Result<Arc<dyn TokenCredential>, AuthError> {
    let mut failures = Vec::new();

    for (position, kind) in chain.iter().enumerate() {
        match kind.build(options) {
            Ok(credential) => {
                if position > 0 {
                    info!("Falling back to {} authentication", kind);
                } else {
                    debug!("Using {} credential", kind);
                }
                return Ok(credential);
            }
            Err(e) => {
                warn!("Credential {} unavailable: {}", kind, e);
                failures.push(format!("{}: {}", kind, e));
            }
        }
    }

    Err(AuthError::AcquisitionFailed {
        cause: if failures.is_empty() {
            "no credential strategies configured".into()
        } else {
            format!("no credential could be constructed ({})", failures.join("; "))
        },
    })
}

//! Device code flow (RFC 8628) against the Microsoft identity platform.
//!
//! Prints a verification URL and user code, then polls the token endpoint
//! until the user approves on another device, the code expires, or the call
//! is cancelled.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::credential::{CredentialOptions, TokenCredential};
use crate::error::CredentialError;
use crate::oauth::{cancellable, delegated_scope_param, endpoint_error, IdentityEndpoints, TokenGrant};
use crate::token::AccessToken;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// What the user needs in order to approve the sign-in.
#[derive(Debug, Clone)]
pub struct DeviceCodeInfo {
    pub user_code: String,
    pub verification_uri: String,
    pub message: Option<String>,
    pub expires_in: u64,
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

fn default_expires_in() -> u64 {
    900
}

/// Callback that shows the device code to the user.
#[derive(Clone)]
pub struct DeviceCodePrompt(Arc<dyn Fn(&DeviceCodeInfo) + Send + Sync>);

impl DeviceCodePrompt {
    pub fn new(f: impl Fn(&DeviceCodeInfo) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Print the instructions to stdout.
    pub fn console() -> Self {
        Self::new(|info| {
            println!();
            println!("To authenticate, please visit: {}", info.verification_uri);
            println!("And enter the code: {}", info.user_code);
            println!("Waiting for authentication to complete...");
        })
    }

    /// Discard the instructions.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    fn show(&self, info: &DeviceCodeInfo) {
        (self.0)(info)
    }
}

impl fmt::Debug for DeviceCodePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceCodePrompt")
    }
}

/// Delegated credential using the device code flow.
pub struct DeviceCodeCredential {
    client_id: String,
    endpoints: IdentityEndpoints,
    prompt: DeviceCodePrompt,
    refresh_token: Mutex<Option<SecretString>>,
}

impl DeviceCodeCredential {
    pub fn new(options: &CredentialOptions) -> Result<Self, CredentialError> {
        if options.client_id.is_empty() {
            return Err(CredentialError::Unavailable {
                credential: "device_code",
                reason: "Microsoft365:ClientId is not configured".into(),
            });
        }

        Ok(Self {
            client_id: options.client_id.clone(),
            endpoints: IdentityEndpoints::new(
                options.http.clone(),
                &options.authority_host,
                &options.tenant_id,
            ),
            prompt: options.device_code_prompt.clone(),
            refresh_token: Mutex::new(None),
        })
    }

    async fn request_device_code(&self, scope: &str) -> Result<DeviceCodeResponse, CredentialError> {
        let url = self.endpoints.device_code_url();
        let response = self
            .endpoints
            .http()
            .post(&url)
            .header("Accept", "application/json")
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope)])
            .send()
            .await
            .map_err(|source| CredentialError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| CredentialError::Transport { url, source })?;

        if !status.is_success() {
            return Err(endpoint_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| CredentialError::Protocol(e.to_string()))
    }

    async fn poll_until_complete(
        &self,
        device: &DeviceCodeResponse,
        cancel: &CancellationToken,
    ) -> Result<TokenGrant, CredentialError> {
        let started = Instant::now();
        let expires_in = Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS));

        loop {
            if started.elapsed() >= expires_in {
                return Err(CredentialError::DeviceCodeExpired);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(CredentialError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            let form = [
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.client_id.as_str()),
                ("device_code", device.device_code.as_str()),
            ];

            match cancellable(cancel, self.endpoints.request_token(&form)).await {
                Ok(grant) => return Ok(grant),
                Err(CredentialError::Endpoint { error, description }) => {
                    let code = error.clone();
                    match code.as_str() {
                        "authorization_pending" => continue,
                        "slow_down" => {
                            interval += Duration::from_secs(SLOW_DOWN_INCREMENT_SECS);
                            debug!("Device code polling slowed to {:?}", interval);
                        }
                        "expired_token" | "code_expired" => {
                            return Err(CredentialError::DeviceCodeExpired)
                        }
                        "authorization_declined" | "access_denied" => {
                            return Err(CredentialError::Declined(description))
                        }
                        _ => return Err(CredentialError::Endpoint { error, description }),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TokenCredential for DeviceCodeCredential {
    fn name(&self) -> &'static str {
        "device_code"
    }

    async fn get_token(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<AccessToken, CredentialError> {
        let scope = delegated_scope_param(scopes);

        let refresh = self.refresh_token.lock().clone();
        if let Some(refresh) = refresh {
            let renewal = self
                .endpoints
                .refresh(&self.client_id, refresh.expose_secret(), &scope);
            match cancellable(cancel, renewal).await {
                Ok(grant) => {
                    debug!("Renewed device code token silently");
                    return Ok(self.remember(grant));
                }
                Err(CredentialError::Cancelled) => return Err(CredentialError::Cancelled),
                Err(e) => debug!("Silent renewal failed, prompting again: {}", e),
            }
        }

        let device = cancellable(cancel, self.request_device_code(&scope)).await?;
        self.prompt.show(&DeviceCodeInfo {
            user_code: device.user_code.clone(),
            verification_uri: device.verification_uri.clone(),
            message: device.message.clone(),
            expires_in: device.expires_in,
        });

        let grant = self.poll_until_complete(&device, cancel).await?;
        info!("Device code sign-in completed");
        Ok(self.remember(grant))
    }
}

impl DeviceCodeCredential {
    fn remember(&self, grant: TokenGrant) -> AccessToken {
        if let Some(refresh) = grant.refresh_token {
            *self.refresh_token.lock() = Some(refresh);
        }
        grant.access
    }
}

//! Shared Microsoft identity platform plumbing: token endpoint grants,
//! error responses and scope helpers.

use std::future::Future;

use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CredentialError;
use crate::token::AccessToken;

/// Tenant used when none is configured; accepts any work or school account.
pub(crate) const DEFAULT_TENANT: &str = "organizations";

/// Lifetime assumed when an endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Successful token grant.
pub(crate) struct TokenGrant {
    pub access: AccessToken,
    pub refresh_token: Option<SecretString>,
}

/// Some endpoints (notably managed identity) send numbers as strings.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum NumberOrString {
    Number(i64),
    String(String),
}

impl NumberOrString {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::String(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<NumberOrString>,
    #[serde(default)]
    pub expires_on: Option<NumberOrString>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn into_grant(self) -> TokenGrant {
        let access = match self.expires_on.as_ref().and_then(NumberOrString::as_i64) {
            Some(epoch) => match chrono::DateTime::from_timestamp(epoch, 0) {
                Some(at) => AccessToken::new(self.access_token, at),
                None => AccessToken::expiring_in(self.access_token, DEFAULT_EXPIRES_IN_SECS),
            },
            None => {
                let secs = self
                    .expires_in
                    .as_ref()
                    .and_then(NumberOrString::as_i64)
                    .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
                AccessToken::expiring_in(self.access_token, secs)
            }
        };

        TokenGrant {
            access,
            refresh_token: self.refresh_token.map(SecretString::new),
        }
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Turn a non-success body into an endpoint error, keeping the AAD description.
pub(crate) fn endpoint_error(status: reqwest::StatusCode, body: &str) -> CredentialError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(resp) => CredentialError::Endpoint {
            error: resp.error,
            description: resp.error_description.unwrap_or_default(),
        },
        Err(_) => CredentialError::Endpoint {
            error: format!("http_{}", status.as_u16()),
            description: body.to_string(),
        },
    }
}

/// Race a future against cancellation.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, CredentialError>
where
    F: Future<Output = Result<T, CredentialError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CredentialError::Cancelled),
        result = fut => result,
    }
}

/// `/oauth2/v2.0/*` endpoints of one tenant.
#[derive(Clone)]
pub(crate) struct IdentityEndpoints {
    http: Client,
    base: String,
}

impl IdentityEndpoints {
    pub fn new(http: Client, authority_host: &str, tenant_id: &str) -> Self {
        let tenant = if tenant_id.is_empty() {
            DEFAULT_TENANT
        } else {
            tenant_id
        };
        Self {
            http,
            base: format!("{}/{}/oauth2/v2.0", authority_host.trim_end_matches('/'), tenant),
        }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.base)
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/devicecode", self.base)
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base)
    }

    /// POST a form-encoded grant to the token endpoint.
    pub async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenGrant, CredentialError> {
        let url = self.token_url();
        let grant_type = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("unknown");
        debug!("Requesting token: grant_type={}", grant_type);

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
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

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| CredentialError::Protocol(e.to_string()))?;
        Ok(parsed.into_grant())
    }

    /// Silent renewal with a refresh token.
    pub async fn refresh(
        &self,
        client_id: &str,
        refresh_token: &str,
        scopes: &str,
    ) -> Result<TokenGrant, CredentialError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("scope", scopes),
        ])
        .await
    }
}

/// Space-joined delegated scopes, with `offline_access` so a refresh token is issued.
pub(crate) fn delegated_scope_param(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    if !all.contains(&"offline_access") {
        all.push("offline_access");
    }
    all.join(" ")
}

/// Resource URI of a scope: `https://graph.microsoft.com/Files.Read.All` → `https://graph.microsoft.com`.
pub(crate) fn scope_to_resource(scope: &str) -> String {
    let trimmed = scope.trim_end_matches("/.default");
    match trimmed.find("://") {
        Some(scheme_end) => {
            let rest = &trimmed[scheme_end + 3..];
            match rest.find('/') {
                Some(path_start) => trimmed[..scheme_end + 3 + path_start].to_string(),
                None => trimmed.to_string(),
            }
        }
        None => trimmed.to_string(),
    }
}

/// App-only scope for the resource of the first requested scope.
pub(crate) fn default_scope(scopes: &[String]) -> Option<String> {
    scopes
        .first()
        .map(|s| format!("{}/.default", scope_to_resource(s)))
}

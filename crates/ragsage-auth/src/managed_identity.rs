//! Managed identity credential: App Service identity endpoint when the
//! platform advertises one, Azure Instance Metadata Service otherwise.

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::credential::{CredentialOptions, TokenCredential};
use crate::environment::CLIENT_ID_VAR;
use crate::error::CredentialError;
use crate::oauth::{cancellable, endpoint_error, scope_to_resource, TokenResponse};
use crate::token::AccessToken;

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

#[derive(Debug, Clone)]
enum Endpoint {
    AppService { url: String, secret: String },
    Imds { url: String },
}

pub struct ManagedIdentityCredential {
    http: Client,
    endpoint: Endpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    /// Always constructs; reachability is only known when a token is requested.
    pub fn new(options: &CredentialOptions) -> Result<Self, CredentialError> {
        let env = |key: &str| (options.env)(key).filter(|v| !v.is_empty());

        let endpoint = match (env("IDENTITY_ENDPOINT"), env("IDENTITY_HEADER")) {
            (Some(url), Some(secret)) => Endpoint::AppService { url, secret },
            _ => Endpoint::Imds {
                url: IMDS_ENDPOINT.to_string(),
            },
        };

        Ok(Self {
            http: options.http.clone(),
            endpoint,
            client_id: env(CLIENT_ID_VAR),
        })
    }

    /// Use an explicit IMDS-style endpoint.
    pub fn with_endpoint(http: Client, url: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            http,
            endpoint: Endpoint::Imds { url: url.into() },
            client_id,
        }
    }

    async fn request(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let (url, request) = match &self.endpoint {
            Endpoint::AppService { url, secret } => (
                url.clone(),
                self.http
                    .get(url)
                    .header("X-IDENTITY-HEADER", secret)
                    .query(&[("api-version", APP_SERVICE_API_VERSION), ("resource", resource)]),
            ),
            Endpoint::Imds { url } => (
                url.clone(),
                self.http
                    .get(url)
                    .header("Metadata", "true")
                    .query(&[("api-version", IMDS_API_VERSION), ("resource", resource)]),
            ),
        };
        let request = match &self.client_id {
            Some(client_id) => request.query(&[("client_id", client_id.as_str())]),
            None => request,
        };

        let response = request.send().await.map_err(|source| CredentialError::Transport {
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
        Ok(parsed.into_grant().access)
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "managed_identity"
    }

    async fn get_token(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<AccessToken, CredentialError> {
        let resource = scopes
            .first()
            .map(|s| scope_to_resource(s))
            .ok_or_else(|| CredentialError::Protocol("no scopes requested".into()))?;
        debug!("Requesting managed identity token for {}", resource);

        cancellable(cancel, self.request(&resource)).await
    }
}

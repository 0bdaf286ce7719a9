//! Client secret credential read from `AZURE_*` environment variables.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::credential::{CredentialOptions, TokenCredential};
use crate::error::CredentialError;
use crate::oauth::{cancellable, default_scope, IdentityEndpoints};
use crate::token::AccessToken;

pub const TENANT_ID_VAR: &str = "AZURE_TENANT_ID";
pub const CLIENT_ID_VAR: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "AZURE_CLIENT_SECRET";

/// App-only credential using the client credentials grant.
pub struct EnvironmentCredential {
    client_id: String,
    client_secret: SecretString,
    endpoints: IdentityEndpoints,
}

impl EnvironmentCredential {
    /// Fails unless tenant, client id and client secret are all set.
    pub fn new(options: &CredentialOptions) -> Result<Self, CredentialError> {
        let lookup = |key: &str| (options.env)(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = [TENANT_ID_VAR, CLIENT_ID_VAR, CLIENT_SECRET_VAR]
            .into_iter()
            .filter(|key| lookup(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(CredentialError::Unavailable {
                credential: "environment",
                reason: format!("missing {}", missing.join(", ")),
            });
        }

        let tenant_id = lookup(TENANT_ID_VAR).unwrap_or_default();
        let client_id = lookup(CLIENT_ID_VAR).unwrap_or_default();
        let client_secret = lookup(CLIENT_SECRET_VAR).unwrap_or_default();

        Ok(Self {
            client_id,
            client_secret: SecretString::new(client_secret),
            endpoints: IdentityEndpoints::new(options.http.clone(), &options.authority_host, &tenant_id),
        })
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn get_token(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<AccessToken, CredentialError> {
        let scope = default_scope(scopes)
            .ok_or_else(|| CredentialError::Protocol("no scopes requested".into()))?;
        debug!("Requesting app-only token for {}", scope);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("scope", scope.as_str()),
        ];
        let grant = cancellable(cancel, self.endpoints.request_token(&form)).await?;
        Ok(grant.access)
    }
}

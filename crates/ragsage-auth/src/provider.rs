//! Token provider: external override, then cache, then credential.

use std::sync::Arc;

use parking_lot::RwLock;
use ragsage_core::Microsoft365Options;
use secrecy::SecretString;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::credential::{build_credential, CredentialKind, CredentialOptions, TokenCredential};
use crate::error::AuthError;
use crate::token::{AccessToken, AuthContext};

/// Cached tokens are renewed once they are this close to expiry.
const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Scope of the Azure AI inference API.
pub const AI_INFERENCE_SCOPE: &str = "https://ai.azure.com/.default";

/// Hands out bearer tokens for one set of scopes.
///
/// Token sources, in order: the per-call [`AuthContext`], the session override
/// set through [`TokenProvider::set_external_token`], the in-memory cache,
/// and finally the credential built at construction time.
///
/// The session override is scope-local: create one provider per console
/// session. Concurrent HTTP requests must use [`AuthContext`] instead.
pub struct TokenProvider {
    scopes: Vec<String>,
    credential: Result<Arc<dyn TokenCredential>, AuthError>,
    cache: Mutex<Option<AccessToken>>,
    session_token: RwLock<Option<SecretString>>,
}

impl TokenProvider {
    /// Provider for the configured Microsoft 365 scopes and authentication mode.
    pub fn from_options(options: &Microsoft365Options) -> Self {
        let credential_options = CredentialOptions::from_microsoft365(options);
        Self::from_chain(
            options.scopes.clone(),
            &credential_options,
            CredentialKind::chain_for(options.auth_mode()),
        )
    }

    /// Non-interactive provider for the AI inference scope.
    pub fn for_inference(options: &Microsoft365Options) -> Self {
        let credential_options = CredentialOptions::from_microsoft365(options);
        Self::from_chain(
            vec![AI_INFERENCE_SCOPE.to_string()],
            &credential_options,
            CredentialKind::chain_for(ragsage_core::AuthMode::Managed),
        )
    }

    /// Build the credential from `chain`. A construction failure is kept and
    /// reported by [`TokenProvider::get_token`], so external tokens keep working.
    pub fn from_chain(scopes: Vec<String>, options: &CredentialOptions, chain: &[CredentialKind]) -> Self {
        let credential = build_credential(options, chain);
        match &credential {
            Ok(c) => info!("Token provider using {} credential", c.name()),
            Err(e) => error!("No credential available: {}", e),
        }
        Self {
            scopes,
            credential,
            cache: Mutex::new(None),
            session_token: RwLock::new(None),
        }
    }

    pub fn with_credential(scopes: Vec<String>, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            scopes,
            credential: Ok(credential),
            cache: Mutex::new(None),
            session_token: RwLock::new(None),
        }
    }

    /// Name of the underlying credential, if one could be built.
    pub fn credential_name(&self) -> Option<&'static str> {
        self.credential.as_ref().ok().map(|c| c.name())
    }

    /// Use `token` for every call without an [`AuthContext`] token until cleared.
    pub fn set_external_token(&self, token: impl Into<String>) {
        let token = token.into();
        *self.session_token.write() = if token.is_empty() {
            None
        } else {
            Some(SecretString::new(token))
        };
    }

    pub fn clear_external_token(&self) {
        *self.session_token.write() = None;
    }

    /// Bearer token for this provider's scopes.
    pub async fn get_token(
        &self,
        auth: &AuthContext,
        cancel: &CancellationToken,
    ) -> Result<SecretString, AuthError> {
        if let Some(token) = auth.external_token() {
            debug!("Using caller-supplied access token");
            return Ok(token.clone());
        }
        if let Some(token) = self.session_token.read().clone() {
            debug!("Using session access token");
            return Ok(token);
        }

        let credential = self.credential.as_ref().map_err(Clone::clone)?;

        // Held across acquisition so only one prompt is in flight.
        let mut cache = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            guard = self.cache.lock() => guard,
        };

        if let Some(token) = cache.as_ref() {
            if !token.will_expire_within(chrono::Duration::minutes(REFRESH_WINDOW_MINUTES)) {
                return Ok(token.secret().clone());
            }
            debug!("Cached token expires at {}, renewing", token.expires_on());
        }

        let token = credential.get_token(&self.scopes, cancel).await.map_err(|e| {
            let err = AuthError::from(e);
            if err != AuthError::Cancelled {
                error!("Failed to acquire token with {}: {}", credential.name(), err);
            }
            err
        })?;
        info!(
            "Acquired token with {} (expires {})",
            credential.name(),
            token.expires_on()
        );

        let secret = token.secret().clone();
        *cache = Some(token);
        Ok(secret)
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("scopes", &self.scopes)
            .field("credential", &self.credential_name())
            .field("session_token", &self.session_token.read().as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use async_trait::async_trait;
    use secrecy::ExposeSecret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl TokenCredential for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn get_token(
            &self,
            _scopes: &[String],
            _cancel: &CancellationToken,
        ) -> Result<AccessToken, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::expiring_in(format!("token-{n}"), self.lifetime_secs))
        }
    }

    fn provider(lifetime_secs: i64) -> (TokenProvider, Arc<Counting>) {
        let cred = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            lifetime_secs,
        });
        (
            TokenProvider::with_credential(vec!["scope".into()], cred.clone()),
            cred,
        )
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let (provider, cred) = provider(3600);
        let cancel = CancellationToken::new();

        let a = provider.get_token(&AuthContext::none(), &cancel).await.unwrap();
        let b = provider.get_token(&AuthContext::none(), &cancel).await.unwrap();

        assert_eq!(a.expose_secret(), "token-1");
        assert_eq!(b.expose_secret(), "token-1");
        assert_eq!(cred.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_near_expiry_is_renewed() {
        let (provider, cred) = provider(60);
        let cancel = CancellationToken::new();

        provider.get_token(&AuthContext::none(), &cancel).await.unwrap();
        let second = provider.get_token(&AuthContext::none(), &cancel).await.unwrap();

        assert_eq!(second.expose_secret(), "token-2");
        assert_eq!(cred.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_external_token_skips_credential() {
        let (provider, cred) = provider(3600);
        let ctx = AuthContext::with_external_token("abc123");

        let token = provider.get_token(&ctx, &CancellationToken::new()).await.unwrap();

        assert_eq!(token.expose_secret(), "abc123");
        assert_eq!(cred.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_override_set_and_clear() {
        let (provider, cred) = provider(3600);
        let cancel = CancellationToken::new();

        provider.set_external_token("session-tok");
        let token = provider.get_token(&AuthContext::none(), &cancel).await.unwrap();
        assert_eq!(token.expose_secret(), "session-tok");

        // Per-call context wins over the session override.
        let token = provider
            .get_token(&AuthContext::with_external_token("call-tok"), &cancel)
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "call-tok");
        assert_eq!(cred.calls.load(Ordering::SeqCst), 0);

        provider.clear_external_token();
        let token = provider.get_token(&AuthContext::none(), &cancel).await.unwrap();
        assert_eq!(token.expose_secret(), "token-1");
    }

    #[tokio::test]
    async fn test_missing_credential_reported_at_acquisition() {
        let options = CredentialOptions {
            tenant_id: String::new(),
            client_id: String::new(),
            authority_host: "https://login.microsoftonline.com".into(),
            http: reqwest::Client::new(),
            browser: None,
            device_code_prompt: crate::DeviceCodePrompt::silent(),
            env: Arc::new(|_| None),
        };
        let provider = TokenProvider::from_chain(
            vec!["scope".into()],
            &options,
            CredentialKind::chain_for(ragsage_core::AuthMode::Delegated),
        );
        assert!(provider.credential_name().is_none());

        let cancel = CancellationToken::new();
        let err = provider.get_token(&AuthContext::none(), &cancel).await.unwrap_err();
        assert!(matches!(err, AuthError::AcquisitionFailed { .. }));

        let token = provider
            .get_token(&AuthContext::with_external_token("abc123"), &cancel)
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "abc123");
    }
}

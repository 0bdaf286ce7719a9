//! Token values.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};

/// A bearer token and the instant it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::new(token.into()),
            expires_on,
        }
    }

    /// Token valid for `seconds` from now.
    pub fn expiring_in(token: impl Into<String>, seconds: i64) -> Self {
        Self::new(token, Utc::now() + Duration::seconds(seconds))
    }

    pub fn secret(&self) -> &SecretString {
        &self.token
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }

    pub fn will_expire_within(&self, window: Duration) -> bool {
        Utc::now() + window >= self.expires_on
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Per-call authentication context.
///
/// Carries a token the caller already holds (for example one obtained by a web
/// front end). It is immutable and travels with a single request, so
/// concurrent requests never observe each other's tokens.
#[derive(Clone, Default)]
pub struct AuthContext {
    external_token: Option<SecretString>,
}

impl AuthContext {
    /// Context with no caller-supplied token; the credential chain is used.
    pub fn none() -> Self {
        Self::default()
    }

    /// Context carrying a caller-supplied token. Empty tokens are ignored.
    pub fn with_external_token(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.is_empty() {
            return Self::none();
        }
        Self {
            external_token: Some(SecretString::new(token)),
        }
    }

    pub fn external_token(&self) -> Option<&SecretString> {
        self.external_token.as_ref()
    }

    pub fn has_external_token(&self) -> bool {
        self.external_token.is_some()
    }
}

impl From<Option<String>> for AuthContext {
    fn from(token: Option<String>) -> Self {
        token.map(Self::with_external_token).unwrap_or_default()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("external_token", &self.external_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Expose a token for an `Authorization` header value.
pub fn bearer_header(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_window() {
        let token = AccessToken::expiring_in("t", 120);
        assert!(!token.is_expired());
        assert!(token.will_expire_within(Duration::minutes(5)));
        assert!(!token.will_expire_within(Duration::seconds(30)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::expiring_in("super-secret", 3600);
        assert!(!format!("{token:?}").contains("super-secret"));

        let ctx = AuthContext::with_external_token("abc123");
        assert!(!format!("{ctx:?}").contains("abc123"));
    }

    #[test]
    fn test_empty_external_token_is_ignored() {
        assert!(!AuthContext::with_external_token("").has_external_token());
        assert!(!AuthContext::from(Some(String::new())).has_external_token());
        assert!(AuthContext::from(Some("abc".to_string())).has_external_token());
    }

    #[test]
    fn test_bearer_header() {
        let secret = SecretString::new("abc123".into());
        assert_eq!(bearer_header(&secret), "Bearer abc123");
    }
}

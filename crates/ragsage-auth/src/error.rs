//! Authentication error types.

use thiserror::Error;

/// AAD error code returned when a Single-Page Application registration is used
/// from a public (desktop/console) client.
pub const APP_REGISTRATION_MISMATCH_CODE: &str = "AADSTS9002327";

/// Errors raised by an individual credential strategy.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("{credential} is unavailable: {reason}")]
    Unavailable {
        credential: &'static str,
        reason: String,
    },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{error}: {description}")]
    Endpoint { error: String, description: String },

    #[error("Invalid token response: {0}")]
    Protocol(String),

    #[error("Device code expired before sign-in completed")]
    DeviceCodeExpired,

    #[error("Sign-in was declined: {0}")]
    Declined(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token acquisition cancelled")]
    Cancelled,
}

/// Authentication failures surfaced to callers of the token provider and the
/// backends that consume its tokens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error(
        "Authentication failed: The Azure AD app registration is configured as a Single-Page Application (SPA) \
         but this application requires a Public Client configuration. \
         Please update the app registration in Azure Portal:\n\
         1. Go to Azure Portal > Azure Active Directory > App registrations\n\
         2. Find your app and go to Authentication\n\
         3. Remove Single-page application platform\n\
         4. Add Mobile and desktop applications platform with redirect URI: http://127.0.0.1\n\
         5. Set 'Allow public client flows' to Yes\n\
         (cause: {cause})"
    )]
    AppRegistrationMismatch { cause: String },

    #[error("Failed to acquire token: {cause}")]
    AcquisitionFailed { cause: String },

    #[error("Authentication failed: the access token was rejected by {backend} (401 Unauthorized)")]
    TokenRejected { backend: String },

    #[error("Token acquisition cancelled")]
    Cancelled,
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        if matches!(err, CredentialError::Cancelled) {
            return AuthError::Cancelled;
        }
        let cause = err.to_string();
        if cause.contains(APP_REGISTRATION_MISMATCH_CODE) {
            AuthError::AppRegistrationMismatch { cause }
        } else {
            AuthError::AcquisitionFailed { cause }
        }
    }
}

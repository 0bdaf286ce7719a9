use ragsage_auth::AuthError;
use thiserror::Error;

/// Hard retrieval failures. Everything else degrades to an empty result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// The backend answered 401 for the presented token.
    #[error(transparent)]
    Unauthorized(AuthError),

    /// No token could be obtained.
    #[error(transparent)]
    Auth(AuthError),

    #[error("Retrieval cancelled")]
    Cancelled,
}

impl From<AuthError> for RetrievalError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Cancelled => RetrievalError::Cancelled,
            other => RetrievalError::Auth(other),
        }
    }
}

//! Bearer token acquisition for the retrieval and generation backends.
//!
//! A [`TokenProvider`] owns one credential, built once from configuration by
//! walking an ordered list of [`CredentialKind`] strategies, and caches the
//! tokens it hands out. Callers that already hold a token pass it in an
//! [`AuthContext`] and the credential chain is never consulted.

pub mod credential;
pub mod device_code;
pub mod environment;
pub mod error;
pub mod interactive;
pub mod managed_identity;
mod oauth;
pub mod provider;
pub mod token;

pub use credential::{build_credential, CredentialKind, CredentialOptions, TokenCredential};
pub use device_code::{DeviceCodeCredential, DeviceCodeInfo, DeviceCodePrompt};
pub use environment::EnvironmentCredential;
pub use error::{AuthError, CredentialError};
pub use interactive::{BrowserLauncher, InteractiveBrowserCredential};
pub use managed_identity::ManagedIdentityCredential;
pub use provider::{TokenProvider, AI_INFERENCE_SCOPE};
pub use token::{bearer_header, AccessToken, AuthContext};

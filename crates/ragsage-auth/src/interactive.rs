//! Interactive browser sign-in: authorization code flow with PKCE and a
//! loopback `http://127.0.0.1:<port>` redirect.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credential::{CredentialOptions, TokenCredential};
use crate::error::CredentialError;
use crate::oauth::{cancellable, delegated_scope_param, IdentityEndpoints, TokenGrant};
use crate::token::AccessToken;

const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Connections that send no request line within this window are dropped.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = "<html><body><h3>Authentication complete.</h3>\
    <p>You can close this window and return to the application.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Authentication failed.</h3>\
    <p>Return to the application for details.</p></body></html>";

/// How the authorization URL is opened.
#[derive(Clone)]
pub enum BrowserLauncher {
    /// Spawn `program args... <url>`.
    Command { program: String, args: Vec<String> },
    /// Hand the URL to a callback.
    Custom(Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>),
}

impl BrowserLauncher {
    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        BrowserLauncher::Command {
            program: program.into(),
            args,
        }
    }

    pub fn custom(f: impl Fn(&str) -> std::io::Result<()> + Send + Sync + 'static) -> Self {
        BrowserLauncher::Custom(Arc::new(f))
    }

    /// Find a way to open a browser on this machine. `None` on headless hosts.
    pub fn detect() -> Option<Self> {
        if let Ok(browser) = std::env::var("BROWSER") {
            if !browser.trim().is_empty() {
                return Some(Self::command(browser, Vec::new()));
            }
        }

        #[cfg(target_os = "macos")]
        {
            return Some(Self::command("open", Vec::new()));
        }

        #[cfg(target_os = "windows")]
        {
            return Some(Self::command(
                "rundll32",
                vec!["url.dll,FileProtocolHandler".to_string()],
            ));
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            let has_display = std::env::var_os("DISPLAY").is_some()
                || std::env::var_os("WAYLAND_DISPLAY").is_some();
            if !has_display {
                return None;
            }
            return find_in_path("xdg-open")
                .map(|p| Self::command(p.to_string_lossy().into_owned(), Vec::new()));
        }

        #[allow(unreachable_code)]
        None
    }

    fn open(&self, url: &str) -> std::io::Result<()> {
        match self {
            BrowserLauncher::Command { program, args } => {
                std::process::Command::new(program)
                    .args(args)
                    .arg(url)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()?;
                Ok(())
            }
            BrowserLauncher::Custom(f) => f(url),
        }
    }
}

impl fmt::Debug for BrowserLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserLauncher::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
            BrowserLauncher::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn find_in_path(program: &str) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    URL_SAFE_NO_PAD.encode(buf)
}

/// PKCE verifier and its S256 challenge.
struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Delegated credential that signs the user in through their browser.
pub struct InteractiveBrowserCredential {
    client_id: String,
    endpoints: IdentityEndpoints,
    launcher: BrowserLauncher,
    refresh_token: Mutex<Option<SecretString>>,
}

impl InteractiveBrowserCredential {
    /// Fails when no browser can be launched or the client id is missing.
    pub fn new(options: &CredentialOptions) -> Result<Self, CredentialError> {
        if options.client_id.is_empty() {
            return Err(CredentialError::Unavailable {
                credential: "interactive_browser",
                reason: "Microsoft365:ClientId is not configured".into(),
            });
        }
        let launcher = options.browser.clone().ok_or(CredentialError::Unavailable {
            credential: "interactive_browser",
            reason: "no browser is available on this host".into(),
        })?;

        Ok(Self {
            client_id: options.client_id.clone(),
            endpoints: IdentityEndpoints::new(
                options.http.clone(),
                &options.authority_host,
                &options.tenant_id,
            ),
            launcher,
            refresh_token: Mutex::new(None),
        })
    }

    fn remember(&self, grant: TokenGrant) -> AccessToken {
        if let Some(refresh) = grant.refresh_token {
            *self.refresh_token.lock() = Some(refresh);
        }
        grant.access
    }

    async fn sign_in(&self, scope: &str, cancel: &CancellationToken) -> Result<TokenGrant, CredentialError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());
        let pkce = Pkce::generate();
        let state = random_urlsafe(16);

        let authorize = Url::parse_with_params(
            &self.endpoints.authorize_url(),
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", scope),
                ("state", state.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| CredentialError::Protocol(format!("invalid authorize URL: {}", e)))?;

        self.launcher.open(authorize.as_str())?;
        info!("Opened browser for sign-in, waiting for redirect on {}", redirect_uri);

        let code = cancellable(cancel, wait_for_redirect(&listener, &state)).await?;

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("scope", scope),
        ];
        cancellable(cancel, self.endpoints.request_token(&form)).await
    }
}

#[async_trait]
impl TokenCredential for InteractiveBrowserCredential {
    fn name(&self) -> &'static str {
        "interactive_browser"
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
                    debug!("Renewed interactive token silently");
                    return Ok(self.remember(grant));
                }
                Err(CredentialError::Cancelled) => return Err(CredentialError::Cancelled),
                Err(e) => debug!("Silent renewal failed, opening browser: {}", e),
            }
        }

        let grant = self.sign_in(&scope, cancel).await?;
        info!("Interactive sign-in completed");
        Ok(self.remember(grant))
    }
}

/// Accept loopback connections until the authorization redirect arrives.
pub(crate) async fn wait_for_redirect(
    listener: &TcpListener,
    expected_state: &str,
) -> Result<String, CredentialError> {
    loop {
        let (mut stream, peer) = listener.accept().await?;

        // Browsers may open speculative connections that never send a request.
        let target = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
            Ok(Ok(Some(target))) => target,
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                debug!("Dropping loopback connection from {}: {}", peer, e);
                continue;
            }
            Err(_) => {
                debug!("Dropping idle loopback connection from {}", peer);
                continue;
            }
        };
        let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
            respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
            continue;
        };
        if url.path() != "/" {
            respond(&mut stream, "404 Not Found", "").await;
            continue;
        }

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            respond(&mut stream, "200 OK", FAILURE_PAGE).await;
            return Err(CredentialError::Endpoint {
                error: error.clone(),
                description: params.get("error_description").cloned().unwrap_or_default(),
            });
        }

        let Some(code) = params.get("code") else {
            respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
            continue;
        };

        if params.get("state").map(String::as_str) != Some(expected_state) {
            respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
            return Err(CredentialError::Protocol(
                "state parameter mismatch on sign-in redirect".into(),
            ));
        }

        respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
        return Ok(code.clone());
    }
}

async fn read_request_target(stream: &mut TcpStream) -> Result<Option<String>, CredentialError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to answer sign-in redirect: {}", e);
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_redirect(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost:{}\r\n\r\n", target, port);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_pkce_challenge_is_s256_of_verifier() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(
            pkce.challenge,
            URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()))
        );
    }

    #[tokio::test]
    async fn test_redirect_returns_code() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let favicon = send_redirect(port, "/favicon.ico").await;
            assert!(favicon.starts_with("HTTP/1.1 404"));
            send_redirect(port, "/?code=auth-code-1&state=xyz").await
        });

        let code = wait_for_redirect(&listener, "xyz").await.unwrap();
        assert_eq!(code, "auth-code-1");
        assert!(client.await.unwrap().contains("Authentication complete"));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_redirect() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let response = send_redirect(port, "/?code=c1&state=xyz").await;
            drop(idle);
            response
        });

        let code = tokio::time::timeout(Duration::from_secs(10), wait_for_redirect(&listener, "xyz"))
            .await
            .expect("redirect accepted after idle connection")
            .unwrap();
        assert_eq!(code, "c1");
        assert!(client.await.unwrap().contains("Authentication complete"));
    }

    #[tokio::test]
    async fn test_redirect_error_keeps_aad_description() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            send_redirect(
                port,
                "/?error=invalid_request&error_description=AADSTS9002327%3A+SPA+client&state=xyz",
            )
            .await
        });

        match wait_for_redirect(&listener, "xyz").await {
            Err(CredentialError::Endpoint { error, description }) => {
                assert_eq!(error, "invalid_request");
                assert!(description.starts_with("AADSTS9002327"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_rejects_state_mismatch() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move { send_redirect(port, "/?code=c&state=other").await });

        let err = wait_for_redirect(&listener, "xyz").await.unwrap_err();
        assert!(matches!(err, CredentialError::Protocol(_)));
    }
}

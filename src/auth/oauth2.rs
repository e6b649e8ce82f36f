//! OAuth 2.0 token acquisition
//!
//! Supports the client_credentials, password, and authorization_code grant
//! types. Tokens are cached process-wide keyed by endpoint, client, and
//! scope, with in-flight dedup so concurrent runs against the same provider
//! trigger a single token request.
//!
//! The authorization_code grant never opens a browser or binds a socket
//! itself: the engine builds the consent URL and hands it to a
//! host-supplied callback which resolves with the authorization code. The
//! wait is raced against the run's cancellation token.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::collection::{OAuth2Config, OAuth2GrantType};
use crate::errors::{EngineError, Result};
use crate::pipeline::hooks::{AuthCodeFetcher, AuthCodePrompt};

/// Token endpoint success response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Token endpoint error response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenError {
    pub error: String,
    pub error_description: Option<String>,
}

/// Cached token with expiration tracking
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    pub obtained_at: Instant,
    pub expires_in: Option<Duration>,
    pub refresh_token: Option<String>,
}

impl CachedToken {
    /// Check if the token is still valid (with 30 second buffer)
    pub fn is_valid(&self) -> bool {
        if let Some(expires_in) = self.expires_in {
            self.obtained_at.elapsed() < expires_in.saturating_sub(Duration::from_secs(30))
        } else {
            true
        }
    }

    /// Get the Authorization header value
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl From<TokenResponse> for CachedToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            token_type: if response.token_type.is_empty() {
                "Bearer".to_string()
            } else {
                response.token_type
            },
            obtained_at: Instant::now(),
            expires_in: response.expires_in.map(Duration::from_secs),
            refresh_token: response.refresh_token,
        }
    }
}

/// PKCE code verifier and challenge (S256)
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        let verifier = URL_SAFE_NO_PAD.encode(random_bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
            method: "S256".to_string(),
        }
    }
}

static OAUTH_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create OAuth HTTP client")
});

/// Token cache: non-blocking concurrent access across runs
static TOKEN_CACHE: Lazy<DashMap<String, CachedToken>> = Lazy::new(DashMap::new);

/// Keys with a token request in flight, for thundering-herd prevention
static IN_FLIGHT: Lazy<DashSet<String>> = Lazy::new(DashSet::new);

/// Drop the entire token cache; exposed to scripts via `auth::clear_oauth_cache()`.
pub fn clear_token_cache() {
    TOKEN_CACHE.clear();
}

fn cache_key(config: &OAuth2Config) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.client_secret.as_deref().unwrap_or_default().as_bytes());
    let secret_hash = hex::encode(hasher.finalize());

    format!(
        "{}:{}:{}:{}",
        config.token_url,
        config.client_id,
        secret_hash,
        config.scope.as_deref().unwrap_or_default()
    )
}

/// RAII guard ensuring IN_FLIGHT cleanup on drop, including cancellation
struct InFlightGuard {
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.remove(&self.key);
    }
}

/// Get a token for the request: cache first, then refresh, then the
/// configured grant flow. The whole acquisition is raced against the run's
/// cancellation token.
pub async fn resolve_token(
    config: &OAuth2Config,
    fetcher: Option<&AuthCodeFetcher>,
    cancel: &CancellationToken,
) -> Result<CachedToken> {
    let key = cache_key(config);

    if let Some(cached) = TOKEN_CACHE.get(&key) {
        if cached.is_valid() {
            tracing::debug!(token_url = %config.token_url, "reusing cached OAuth2 token");
            return Ok(cached.clone());
        }
    }

    // Wait for a concurrent acquisition of the same key, honoring
    // cancellation while parked.
    loop {
        if IN_FLIGHT.insert(key.clone()) {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(EngineError::Cancelled("while waiting for OAuth2 token".to_string()));
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        if let Some(cached) = TOKEN_CACHE.get(&key) {
            if cached.is_valid() {
                return Ok(cached.clone());
            }
        }
    }

    let _guard = InFlightGuard { key: key.clone() };

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            Err(EngineError::Cancelled("while acquiring OAuth2 token".to_string()))
        }
        result = acquire(config, fetcher, cancel, &key) => result,
    };

    match result {
        Ok(token) => {
            TOKEN_CACHE.insert(key, token.clone());
            Ok(token)
        }
        Err(e) => Err(e),
    }
}

async fn acquire(
    config: &OAuth2Config,
    fetcher: Option<&AuthCodeFetcher>,
    cancel: &CancellationToken,
    key: &str,
) -> Result<CachedToken> {
    // An expired cached token with a refresh token gets one refresh attempt
    // before falling back to the full grant.
    let stale_refresh = TOKEN_CACHE
        .get(key)
        .and_then(|cached| cached.refresh_token.clone());
    if let Some(refresh) = stale_refresh {
        match refresh_grant(config, &refresh).await {
            Ok(token) => return Ok(token),
            Err(e) => {
                tracing::debug!(error = %e, "OAuth2 refresh failed, running full grant");
            }
        }
    }

    match config.grant_type {
        OAuth2GrantType::ClientCredentials => client_credentials_grant(config).await,
        OAuth2GrantType::Password => password_grant(config).await,
        OAuth2GrantType::AuthorizationCode => {
            authorization_code_grant(config, fetcher, cancel).await
        }
    }
}

async fn client_credentials_grant(config: &OAuth2Config) -> Result<CachedToken> {
    let mut form = vec![("grant_type", "client_credentials".to_string())];
    if let Some(scope) = &config.scope {
        form.push(("scope", scope.clone()));
    }

    let request = OAUTH_CLIENT
        .post(&config.token_url)
        .basic_auth(&config.client_id, config.client_secret.as_deref())
        .form(&form)
        .header("Accept", "application/json");

    send_token_request(request).await
}

async fn password_grant(config: &OAuth2Config) -> Result<CachedToken> {
    let username = config
        .username
        .clone()
        .ok_or_else(|| EngineError::Auth("password grant requires a username".to_string()))?;
    let password = config.password.clone().unwrap_or_default();

    let mut form = vec![
        ("grant_type", "password".to_string()),
        ("username", username),
        ("password", password),
        ("client_id", config.client_id.clone()),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.clone()));
    }
    if let Some(scope) = &config.scope {
        form.push(("scope", scope.clone()));
    }

    let request = OAUTH_CLIENT
        .post(&config.token_url)
        .form(&form)
        .header("Accept", "application/json");

    send_token_request(request).await
}

async fn refresh_grant(config: &OAuth2Config, refresh_token: &str) -> Result<CachedToken> {
    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token.to_string()),
        ("client_id", config.client_id.clone()),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.clone()));
    }

    let request = OAUTH_CLIENT
        .post(&config.token_url)
        .form(&form)
        .header("Accept", "application/json");

    let mut token = send_token_request(request).await?;
    // Keep the old refresh token when the provider did not rotate it.
    if token.refresh_token.is_none() {
        token.refresh_token = Some(refresh_token.to_string());
    }
    Ok(token)
}

async fn authorization_code_grant(
    config: &OAuth2Config,
    fetcher: Option<&AuthCodeFetcher>,
    cancel: &CancellationToken,
) -> Result<CachedToken> {
    let fetcher = fetcher.ok_or_else(|| {
        EngineError::Auth(
            "authorization_code grant requires a host authorization-code callback".to_string(),
        )
    })?;
    let authorize_url = config.authorize_url.as_deref().ok_or_else(|| {
        EngineError::Auth("authorization_code grant requires an authorize URL".to_string())
    })?;

    let state = random_state();
    let pkce = config.pkce.then(PkceChallenge::generate);
    let callback_url = config.callback_url.clone().unwrap_or_default();

    let mut consent_url = url::Url::parse(authorize_url)
        .map_err(|e| EngineError::Auth(format!("Invalid authorize URL: {e}")))?;
    {
        let mut params = consent_url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &config.client_id);
        params.append_pair("state", &state);
        if !callback_url.is_empty() {
            params.append_pair("redirect_uri", &callback_url);
        }
        if let Some(scope) = &config.scope {
            params.append_pair("scope", scope);
        }
        if let Some(pkce) = &pkce {
            params.append_pair("code_challenge", &pkce.challenge);
            params.append_pair("code_challenge_method", &pkce.method);
        }
    }

    let prompt = AuthCodePrompt {
        authorize_url: consent_url.to_string(),
        callback_url: callback_url.clone(),
        state,
    };

    tracing::debug!("waiting for host to supply OAuth2 authorization code");
    let code_future = (fetcher.as_ref())(prompt);
    let code = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(EngineError::Cancelled(
                "while waiting for OAuth2 authorization code".to_string(),
            ));
        }
        result = code_future => {
            result.map_err(|e| EngineError::Auth(format!("Authorization code fetch failed: {e}")))?
        }
    };

    let mut form = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code),
        ("client_id", config.client_id.clone()),
    ];
    if !callback_url.is_empty() {
        form.push(("redirect_uri", callback_url));
    }
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.clone()));
    }
    if let Some(pkce) = &pkce {
        form.push(("code_verifier", pkce.verifier.clone()));
    }

    let request = OAUTH_CLIENT
        .post(&config.token_url)
        .form(&form)
        .header("Accept", "application/json");

    send_token_request(request).await
}

/// Send a token request and parse the success or error body.
async fn send_token_request(request: reqwest::RequestBuilder) -> Result<CachedToken> {
    let response = request
        .send()
        .await
        .map_err(|e| EngineError::Auth(format!("OAuth2 token request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| EngineError::Auth(format!("OAuth2 token response unreadable: {e}")))?;

    if !status.is_success() {
        if let Ok(error) = serde_json::from_str::<TokenError>(&body) {
            let message = match error.error_description {
                Some(description) => format!("{}: {}", error.error, description),
                None => error.error,
            };
            return Err(EngineError::Auth(format!("OAuth2 token request failed: {message}")));
        }
        return Err(EngineError::Auth(format!(
            "OAuth2 token request failed with status {status}: {body}"
        )));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| EngineError::Auth(format!("Failed to parse token response: {e}")))?;

    Ok(token.into())
}

fn random_state() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..32)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_validity() {
        let token = CachedToken {
            access_token: "test".to_string(),
            token_type: "Bearer".to_string(),
            obtained_at: Instant::now(),
            expires_in: Some(Duration::from_secs(3600)),
            refresh_token: None,
        };
        assert!(token.is_valid());
    }

    #[test]
    fn test_cached_token_expired() {
        let token = CachedToken {
            access_token: "test".to_string(),
            token_type: "Bearer".to_string(),
            obtained_at: Instant::now() - Duration::from_secs(3700),
            expires_in: Some(Duration::from_secs(3600)),
            refresh_token: None,
        };
        assert!(!token.is_valid());
    }

    #[test]
    fn test_token_without_expiry_stays_valid() {
        let token = CachedToken {
            access_token: "test".to_string(),
            token_type: "Bearer".to_string(),
            obtained_at: Instant::now() - Duration::from_secs(86400),
            expires_in: None,
            refresh_token: None,
        };
        assert!(token.is_valid());
    }

    #[test]
    fn test_authorization_header() {
        let token = CachedToken {
            access_token: "mytoken".to_string(),
            token_type: "Bearer".to_string(),
            obtained_at: Instant::now(),
            expires_in: None,
            refresh_token: None,
        };
        assert_eq!(token.authorization_header(), "Bearer mytoken");
    }

    #[test]
    fn test_default_token_type_is_bearer() {
        let response = TokenResponse {
            access_token: "t".to_string(),
            token_type: String::new(),
            expires_in: None,
            refresh_token: None,
            scope: None,
        };
        let token: CachedToken = response.into();
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn test_pkce_challenge_shape() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.method, "S256");
        assert_eq!(pkce.verifier.len(), 43);
        assert!(!pkce.challenge.is_empty());
        assert_ne!(pkce.verifier, pkce.challenge);
    }

    #[test]
    fn test_cache_key_differs_by_secret() {
        let mut config = OAuth2Config {
            grant_type: OAuth2GrantType::ClientCredentials,
            client_id: "id".to_string(),
            client_secret: Some("one".to_string()),
            token_url: "https://auth.example.org/token".to_string(),
            authorize_url: None,
            callback_url: None,
            username: None,
            password: None,
            scope: None,
            pkce: false,
        };
        let first = cache_key(&config);
        config.client_secret = Some("two".to_string());
        assert_ne!(first, cache_key(&config));
    }

    #[test]
    fn test_random_state_length() {
        let state = random_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

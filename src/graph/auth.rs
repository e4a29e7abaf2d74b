//! OAuth2 client-credentials exchange against the Microsoft identity platform.

use crate::config::Config;
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// A bearer token and the moment it stops being accepted.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// True once the token expires within `grace`.
    pub fn is_expired(&self, grace: Duration) -> bool {
        Utc::now() + grace >= self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenProvider {
    http: reqwest::Client,
    token_url: String,
    scope: String,
    client_id: String,
    client_secret: String,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.endpoints.login_url.trim_end_matches('/'),
            config.tenant_id
        );
        let scope = format!("{}/.default", graph_resource(&config.endpoints.graph_url));

        Self {
            http,
            token_url,
            scope,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    /// Exchanges the client credentials for a token. Credential errors are not retried.
    pub async fn acquire(&self) -> Result<AccessToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(AuthError::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        let body = response.bytes().await.map_err(AuthError::Unreachable)?;
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|err| AuthError::InvalidResponse(err.to_string()))?;

        let secret = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("no access_token in response".to_string()))?;
        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = Utc::now() + Duration::seconds(lifetime);

        log::debug!(
            "acquired access token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(AccessToken::new(secret, expires_at))
    }
}

/// Shares one token between concurrent requests and re-acquires it once it is
/// within `grace` of expiring or the API has rejected it.
pub struct TokenCache {
    provider: TokenProvider,
    grace: Duration,
    current: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(provider: TokenProvider, grace: Duration) -> Self {
        Self {
            provider,
            grace,
            current: Mutex::new(None),
        }
    }

    /// A token valid for at least `grace`, acquiring a new one when needed.
    pub async fn token(&self) -> Result<AccessToken, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|token| !token.is_expired(self.grace)) {
            return Ok(token.clone());
        }

        if current.is_some() {
            log::info!("access token about to expire, acquiring a new one");
        }
        let token = self.provider.acquire().await?;
        *current = Some(token.clone());
        Ok(token)
    }

    /// Drops `rejected` so the next call re-acquires. A token that was already
    /// replaced by another request is left alone.
    pub async fn invalidate(&self, rejected: &AccessToken) {
        let mut current = self.current.lock().await;
        if current
            .as_ref()
            .is_some_and(|token| token.secret() == rejected.secret())
        {
            log::warn!("access token rejected, it will be re-acquired");
            *current = None;
        }
    }
}

/// `https://graph.microsoft.com/v1.0` → `https://graph.microsoft.com`.
fn graph_resource(graph_url: &str) -> &str {
    let trimmed = graph_url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((resource, version)) if version.starts_with('v') || version == "beta" => resource,
        _ => trimmed,
    }
}

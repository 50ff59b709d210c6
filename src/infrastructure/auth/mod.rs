//! OAuth2 client-credentials token cache and the authenticated API client.
//!
//! The cache is an injected component scoped to whatever owns it; nothing
//! here touches process environment or other ambient state. A token lives
//! until a request comes back 401/403, at which point it is refreshed
//! exactly once and the request retried. A second auth failure with the
//! fresh token propagates to the caller.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint {url} returned status {status}")]
    TokenRequestFailed { url: String, status: u16 },
    #[error("request to {url} failed with status {status}")]
    RequestFailed { url: String, status: u16 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Cached bearer token, refreshed through the client-credentials grant.
pub struct TokenCache {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: RwLock<Option<String>>,
}

impl TokenCache {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: RwLock::new(None),
        }
    }

    /// Return the cached token, fetching a fresh one if none is held.
    pub async fn get_or_refresh(&self) -> Result<String, AuthError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = slot.clone() {
            return Ok(token);
        }
        let token = self.fetch().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token after an auth failure signalled it is stale.
    /// The next `get_or_refresh` call fetches a fresh one.
    pub async fn invalidate_on_auth_failure(&self) {
        *self.token.write().await = None;
    }

    async fn fetch(&self) -> Result<String, AuthError> {
        info!(url = %self.token_url, "fetching access token");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenRequestFailed {
                url: self.token_url.clone(),
                status: status.as_u16(),
            });
        }
        let body: TokenResponse = response.json().await?;
        Ok(body.access_token)
    }
}

/// GET client that carries the bearer token and retries once on 401/403.
pub struct ApiClient {
    client: reqwest::Client,
    tokens: TokenCache,
}

impl ApiClient {
    pub fn new(client: reqwest::Client, tokens: TokenCache) -> Self {
        Self { client, tokens }
    }

    pub fn from_config(client: reqwest::Client, auth: &AuthConfig) -> Self {
        let tokens = TokenCache::new(
            client.clone(),
            auth.token_url.clone(),
            auth.client_id.clone(),
            auth.client_secret.clone(),
        );
        Self::new(client, tokens)
    }

    /// Agent persona and routing data, fetched before a call is placed.
    pub async fn fetch_agent_profile(
        &self,
        base_url: &str,
        agent_identifier: &str,
    ) -> Result<Value, AuthError> {
        self.get_json(
            &format!("{base_url}/agent_data"),
            &[("agent_id", agent_identifier)],
        )
        .await
    }

    pub async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, AuthError> {
        let mut token = self.tokens.get_or_refresh().await?;
        let mut tried_refresh = false;
        loop {
            let response = self
                .client
                .get(url)
                .query(params)
                .bearer_auth(&token)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response.json().await?);
            }
            if (status.as_u16() == 401 || status.as_u16() == 403) && !tried_refresh {
                warn!(url, status = status.as_u16(), "token rejected, refreshing");
                self.tokens.invalidate_on_auth_failure().await;
                token = self.tokens.get_or_refresh().await?;
                tried_refresh = true;
                continue;
            }
            return Err(AuthError::RequestFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
    }
}

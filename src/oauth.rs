// src/oauth.rs

use crate::config::{ConfigHandle, OAuthProvider};
use crate::error::{Error, Result};
use crate::ids::now_millis;
use crate::model::TokenRecord;
use crate::store::Store;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use urlencoding::encode;

const DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
}

/// OAuth connection state for a provider, as shown to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub provider: String,
    pub connected: bool,
    pub expires_at: Option<i64>,
    pub expired: bool,
}

/// A token endpoint call that did not yield a usable token.
struct TokenFailure {
    status: Option<u16>,
    body: String,
}

/// Hands out valid access tokens, refreshing stored ones when they run out.
///
/// There is no in-process lock: two callers that both see an expired token
/// both refresh, and the last write wins.
pub struct TokenManager {
    store: Arc<Store>,
    config: ConfigHandle,
    client: Client,
}

impl TokenManager {
    pub fn new(store: Arc<Store>, config: ConfigHandle, client: Client) -> Self {
        Self {
            store,
            config,
            client,
        }
    }

    /// Whether a token expiring at `expires_at` must be refreshed before use.
    fn needs_refresh(&self, expires_at: i64) -> bool {
        let skew_ms = self.config.snapshot().zoho.refresh_skew_secs.max(0) * 1000;
        expires_at <= now_millis() + skew_ms
    }

    /// Current access token for `provider`. A token whose expiry is still
    /// ahead (beyond the configured skew, zero by default) is returned without
    /// touching the network; otherwise it is refreshed first.
    #[tracing::instrument(skip(self))]
    pub async fn get_valid_token(&self, provider: &str) -> Result<String> {
        let token = self
            .store
            .get_token(provider)?
            .ok_or_else(|| Error::NotConnected {
                provider: provider.to_string(),
            })?;

        if !self.needs_refresh(token.expires_at) {
            return Ok(token.access_token);
        }
        let cfg = self.config.snapshot();

        if token.refresh_token.is_empty() {
            return Err(Error::NotConnected {
                provider: provider.to_string(),
            });
        }

        info!(expires_at = token.expires_at, "Access token expired, refreshing");
        let client_cfg = cfg.provider(provider)?;
        let body = format!(
            "client_id={}&client_secret={}&refresh_token={}&grant_type=refresh_token",
            encode(&client_cfg.client_id),
            encode(&client_cfg.client_secret),
            encode(&token.refresh_token),
        );

        let timeout = Duration::from_secs(cfg.zoho.timeout_secs);
        let (access_token, expires_in) = match self.post_token(client_cfg, body, timeout).await {
            Ok(resp) => match resp.access_token {
                Some(access) => (access, resp.expires_in.unwrap_or(DEFAULT_TTL_SECS)),
                None => {
                    return Err(Error::RefreshFailed {
                        provider: provider.to_string(),
                        status: Some(200),
                        body: resp.error.unwrap_or_else(|| "no access_token".to_string()),
                    });
                }
            },
            Err(failure) => {
                warn!(status = ?failure.status, body = %failure.body, "Token refresh rejected");
                return Err(Error::RefreshFailed {
                    provider: provider.to_string(),
                    status: failure.status,
                    body: failure.body,
                });
            }
        };

        // Refresh tokens are not rotated by this provider.
        let refreshed = TokenRecord {
            provider: provider.to_string(),
            access_token: access_token.clone(),
            refresh_token: token.refresh_token,
            expires_at: now_millis() + expires_in * 1000,
        };
        self.store.put_token(&refreshed)?;
        info!(expires_at = refreshed.expires_at, "Access token refreshed");
        Ok(access_token)
    }

    /// Exchange an authorization code for a token set and store it.
    #[tracing::instrument(skip(self, code))]
    pub async fn exchange_code(&self, provider: &str, code: &str) -> Result<TokenRecord> {
        if code.trim().is_empty() {
            return Err(Error::InvalidInput("authorization code is empty".into()));
        }
        let cfg = self.config.snapshot();
        let client_cfg = cfg.provider(provider)?;
        let body = format!(
            "client_id={}&client_secret={}&code={}&redirect_uri={}&grant_type=authorization_code",
            encode(&client_cfg.client_id),
            encode(&client_cfg.client_secret),
            encode(code.trim()),
            encode(&client_cfg.redirect_uri),
        );

        let timeout = Duration::from_secs(cfg.zoho.timeout_secs);
        let resp = self
            .post_token(client_cfg, body, timeout)
            .await
            .map_err(|f| Error::Integration {
                status: f.status.unwrap_or(0),
                body: f.body,
            })?;

        let Some(access_token) = resp.access_token else {
            return Err(Error::Integration {
                status: 200,
                body: resp.error.unwrap_or_else(|| "no access_token".to_string()),
            });
        };

        // Re-consenting may omit the refresh token; keep the one on file.
        let refresh_token = match resp.refresh_token {
            Some(r) => r,
            None => match self.store.get_token(provider)? {
                Some(existing) if !existing.refresh_token.is_empty() => existing.refresh_token,
                _ => {
                    return Err(Error::Integration {
                        status: 200,
                        body: "token response carried no refresh_token".to_string(),
                    });
                }
            },
        };

        let record = TokenRecord {
            provider: provider.to_string(),
            access_token,
            refresh_token,
            expires_at: now_millis() + resp.expires_in.unwrap_or(DEFAULT_TTL_SECS) * 1000,
        };
        self.store.put_token(&record)?;
        info!("OAuth connection established");
        Ok(record)
    }

    /// Consent URL the user visits to connect the provider.
    pub fn authorize_url(&self, provider: &str, state: &str) -> Result<String> {
        let cfg = self.config.snapshot();
        let p = cfg.provider(provider)?;
        Ok(format!(
            "{}?scope={}&client_id={}&response_type=code&access_type=offline&prompt=consent&redirect_uri={}&state={}",
            p.auth_url,
            encode(&p.scopes.join(",")),
            encode(&p.client_id),
            encode(&p.redirect_uri),
            encode(state),
        ))
    }

    /// Connection status from the store alone; never touches the network.
    /// `expired` means the next `get_valid_token` call would refresh.
    pub fn status(&self, provider: &str) -> Result<ConnectionStatus> {
        let token = self.store.get_token(provider)?;
        Ok(ConnectionStatus {
            provider: provider.to_string(),
            connected: token.is_some(),
            expires_at: token.as_ref().map(|t| t.expires_at),
            expired: token.is_some_and(|t| self.needs_refresh(t.expires_at)),
        })
    }

    pub fn is_connected(&self, provider: &str) -> Result<bool> {
        Ok(self.store.get_token(provider)?.is_some())
    }

    pub fn disconnect(&self, provider: &str) -> Result<bool> {
        let removed = self.store.delete_token(provider)?;
        info!(provider = %provider, removed, "OAuth connection removed");
        Ok(removed)
    }

    async fn post_token(
        &self,
        provider: &OAuthProvider,
        body: String,
        timeout: Duration,
    ) -> std::result::Result<TokenResponse, TokenFailure> {
        let resp = self
            .client
            .post(&provider.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TokenFailure {
                status: None,
                body: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TokenFailure {
                status: Some(status.as_u16()),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| TokenFailure {
            status: Some(status.as_u16()),
            body: format!("unreadable token response: {e}: {text}"),
        })
    }
}

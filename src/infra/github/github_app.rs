// GitHub App authentication.
//
// The app signs a short-lived RS256 JWT with its private key and trades it for
// an installation token. Both are cached: the JWT for 9 of its 10 minutes, the
// installation token until 5 minutes before GitHub says it expires.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::GithubAppConfig;
use crate::core::errors::{BotError, BotResult};

const API_BASE: &str = "https://api.github.com";
const JWT_BACKDATE_SECS: i64 = 60;
const JWT_LIFETIME_SECS: i64 = 600;
const JWT_REUSE_SECS: i64 = 9 * 60;
const INSTALLATION_REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

struct CachedToken {
    token: String,
    /// When the cached value must no longer be handed out.
    valid_until: DateTime<Utc>,
}

pub struct GithubAppAuth {
    app_id: u64,
    installation_id: u64,
    key: EncodingKey,
    client: Client,
    base_url: String,
    jwt: Arc<RwLock<Option<CachedToken>>>,
    installation: Arc<RwLock<Option<CachedToken>>>,
}

pub(crate) fn github_client() -> BotResult<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static("ShieldBot/0.2"));
    headers.insert(
        "X-GitHub-Api-Version",
        HeaderValue::from_static("2022-11-28"),
    );

    Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .map_err(|e| BotError::whitelist("HTTP_CLIENT", e.to_string()))
}

impl GithubAppAuth {
    pub fn new(config: &GithubAppConfig) -> BotResult<Self> {
        let key = EncodingKey::from_rsa_pem(config.private_key.as_bytes()).map_err(|e| {
            BotError::config(
                "INVALID_GITHUB_APP_KEY",
                "GITHUB_APP_PRIVATE_KEY is not a valid RSA PEM key",
            )
            .with_context("reason", e)
        })?;

        Ok(Self {
            app_id: config.app_id,
            installation_id: config.installation_id,
            key,
            client: github_client()?,
            base_url: API_BASE.to_string(),
            jwt: Arc::new(RwLock::new(None)),
            installation: Arc::new(RwLock::new(None)),
        })
    }

    /// App JWT, reused for 9 minutes after it was minted.
    pub async fn generate_app_jwt(&self) -> BotResult<String> {
        let now = Utc::now();
        {
            let cached = self.jwt.read().await;
            if let Some(token) = cached.as_ref() {
                if now < token.valid_until {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.jwt.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if now < token.valid_until {
                return Ok(token.token.clone());
            }
        }

        let claims = AppClaims {
            iat: now.timestamp() - JWT_BACKDATE_SECS,
            exp: now.timestamp() + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };
        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(|e| {
            BotError::whitelist("JWT_SIGNING_FAILED", "Could not sign the GitHub App JWT")
                .with_context("reason", e)
        })?;

        *cached = Some(CachedToken {
            token: token.clone(),
            valid_until: now + Duration::seconds(JWT_REUSE_SECS),
        });
        tracing::debug!(app_id = self.app_id, "Minted GitHub App JWT");
        Ok(token)
    }

    /// Installation access token used for repository calls.
    pub async fn installation_token(&self) -> BotResult<String> {
        {
            let cached = self.installation.read().await;
            if let Some(token) = cached.as_ref() {
                if Utc::now() < token.valid_until {
                    return Ok(token.token.clone());
                }
            }
        }

        let jwt = self.generate_app_jwt().await?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, self.installation_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .send()
            .await
            .map_err(|e| BotError::whitelist("GITHUB_REQUEST_FAILED", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::whitelist(
                "INSTALLATION_TOKEN_FAILED",
                format!("GitHub refused the installation token ({})", status),
            )
            .with_context("body", body));
        }

        let parsed: InstallationTokenResponse = response
            .json()
            .await
            .map_err(|e| BotError::whitelist("GITHUB_BAD_RESPONSE", e.to_string()))?;

        *self.installation.write().await = Some(CachedToken {
            token: parsed.token.clone(),
            valid_until: parsed.expires_at - Duration::seconds(INSTALLATION_REFRESH_MARGIN_SECS),
        });
        tracing::info!(
            installation_id = self.installation_id,
            expires_at = %parsed.expires_at,
            "Refreshed GitHub installation token"
        );
        Ok(parsed.token)
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }
}

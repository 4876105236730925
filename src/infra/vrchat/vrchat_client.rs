// VRChat REST client.
//
// Logs in with Basic auth, keeps the `auth` cookie and logs in again once when
// a call comes back 401. Accounts with two-factor auth enabled are not
// supported; use a dedicated bot account without it.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::VrchatConfig;
use crate::core::errors::{BotError, BotResult};
use crate::core::vrchat::{GroupMember, VrchatApi, VrchatUser};

const API_BASE: &str = "https://api.vrchat.cloud/api/1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    id: String,
    display_name: String,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    status_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGroupMember {
    user_id: String,
    #[serde(default)]
    role_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    requires_two_factor_auth: Option<Vec<String>>,
}

pub struct VrchatClient {
    client: Client,
    base_url: String,
    config: VrchatConfig,
    auth_cookie: Arc<RwLock<Option<String>>>,
}

impl VrchatClient {
    pub fn new(config: VrchatConfig) -> BotResult<Self> {
        let mut headers = HeaderMap::new();
        // VRChat rejects requests without a descriptive user agent
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("ShieldBot/0.2 (discord bot)"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| BotError::vrchat("HTTP_CLIENT", e.to_string()))?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            config,
            auth_cookie: Arc::new(RwLock::new(None)),
        })
    }

    /// The auth cookie value, logging in first if there is none.
    pub async fn auth_token(&self) -> BotResult<String> {
        if let Some(cookie) = self.auth_cookie.read().await.clone() {
            return Ok(cookie);
        }
        self.login().await
    }

    /// Force the next call to log in again.
    pub async fn invalidate_session(&self) {
        *self.auth_cookie.write().await = None;
    }

    async fn login(&self) -> BotResult<String> {
        let mut cached = self.auth_cookie.write().await;
        if let Some(cookie) = cached.as_ref() {
            return Ok(cookie.clone());
        }

        let response = self
            .client
            .get(format!("{}/auth/user", self.base_url))
            .header(
                AUTHORIZATION,
                basic_auth_header(&self.config.username, &self.config.password),
            )
            .send()
            .await
            .map_err(request_failed)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(BotError::vrchat(
                "LOGIN_FAILED",
                "VRChat rejected the bot credentials",
            ));
        }
        if !response.status().is_success() {
            return Err(BotError::vrchat(
                "LOGIN_FAILED",
                format!("VRChat login returned {}", response.status()),
            ));
        }

        let cookie = parse_auth_cookie(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        )
        .ok_or_else(|| BotError::vrchat("LOGIN_FAILED", "VRChat did not return an auth cookie"))?;

        let body: LoginResponse = response.json().await.map_err(bad_response)?;
        if body.requires_two_factor_auth.is_some() {
            return Err(BotError::vrchat(
                "TWO_FACTOR_REQUIRED",
                "The VRChat bot account has two-factor auth enabled",
            ));
        }

        *cached = Some(cookie.clone());
        tracing::info!(username = %self.config.username, "Logged in to VRChat");
        Ok(cookie)
    }

    /// Authenticated request. A 401 drops the cookie and retries once.
    async fn send(
        &self,
        method: Method,
        path: &str,
    ) -> BotResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut retried = false;
        loop {
            let cookie = self.auth_token().await?;
            let response = self
                .client
                .request(method.clone(), &url)
                .header(COOKIE, format!("auth={}", cookie))
                .send()
                .await
                .map_err(request_failed)?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried {
                tracing::warn!(path, "VRChat session expired, logging in again");
                *self.auth_cookie.write().await = None;
                retried = true;
                continue;
            }
            return Ok(response);
        }
    }

    async fn expect_success(&self, response: Response, code: &'static str) -> BotResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BotError::vrchat(code, format!("VRChat returned {}", status)).with_context("body", body))
    }
}

fn request_failed(e: reqwest::Error) -> BotError {
    BotError::vrchat("REQUEST_FAILED", e.to_string())
}

fn bad_response(e: reqwest::Error) -> BotError {
    BotError::vrchat("BAD_RESPONSE", e.to_string())
}

/// VRChat wants each credential URL-encoded before the usual base64.
fn basic_auth_header(username: &str, password: &str) -> String {
    let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
    let raw = format!("{}:{}", encode(username), encode(password));
    format!("Basic {}", STANDARD.encode(raw))
}

fn parse_auth_cookie<'a>(headers: impl Iterator<Item = &'a str>) -> Option<String> {
    headers
        .filter_map(|h| h.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix("auth="))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// A friend request that VRChat thinks is already pending.
fn is_already_requested(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("already") && (body.contains("friend request") || body.contains("sent"))
}

/// Withdrawing a request VRChat has already dropped answers 404.
fn is_withdrawn(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND
}

#[async_trait]
impl VrchatApi for VrchatClient {
    async fn get_user(&self, user_id: &str) -> BotResult<Option<VrchatUser>> {
        let response = self
            .send(Method::GET, &format!("/users/{}", user_id))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user: ApiUser = self
            .expect_success(response, "GET_USER_FAILED")
            .await?
            .json()
            .await
            .map_err(bad_response)?;

        Ok(Some(VrchatUser {
            id: user.id,
            display_name: user.display_name,
            bio: user.bio.unwrap_or_default(),
            status_description: user.status_description.unwrap_or_default(),
        }))
    }

    async fn send_friend_request(&self, user_id: &str) -> BotResult<()> {
        let path = format!("/user/{}/friendRequest", user_id);
        let response = self.send(Method::POST, &path).await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if !is_already_requested(&body) {
                return Err(BotError::vrchat(
                    "FRIEND_REQUEST_FAILED",
                    "VRChat refused the friend request",
                )
                .with_context("body", body));
            }
            // Stale request on VRChat's side: withdraw it and send a fresh one
            tracing::info!(vrchat_user_id = user_id, "Re-sending stale friend request");
            let withdrawn = self.send(Method::DELETE, &path).await?;
            if !is_withdrawn(withdrawn.status()) {
                self.expect_success(withdrawn, "FRIEND_REQUEST_WITHDRAW_FAILED")
                    .await?;
            }
            let retry = self.send(Method::POST, &path).await?;
            self.expect_success(retry, "FRIEND_REQUEST_FAILED").await?;
            return Ok(());
        }

        self.expect_success(response, "FRIEND_REQUEST_FAILED").await?;
        Ok(())
    }

    async fn get_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> BotResult<Option<GroupMember>> {
        let response = self
            .send(
                Method::GET,
                &format!("/groups/{}/members/{}", group_id, user_id),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        // Non-members come back as `null`
        let member: Option<ApiGroupMember> = self
            .expect_success(response, "GET_GROUP_MEMBER_FAILED")
            .await?
            .json()
            .await
            .map_err(bad_response)?;

        Ok(member.map(|m| GroupMember {
            user_id: m.user_id,
            role_ids: m.role_ids,
        }))
    }

    async fn add_group_role(&self, group_id: &str, user_id: &str, role_id: &str) -> BotResult<()> {
        let response = self
            .send(
                Method::PUT,
                &format!("/groups/{}/members/{}/roles/{}", group_id, user_id, role_id),
            )
            .await?;
        self.expect_success(response, "ADD_GROUP_ROLE_FAILED").await?;
        Ok(())
    }

    async fn remove_group_role(
        &self,
        group_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> BotResult<()> {
        let response = self
            .send(
                Method::DELETE,
                &format!("/groups/{}/members/{}/roles/{}", group_id, user_id, role_id),
            )
            .await?;
        self.expect_success(response, "REMOVE_GROUP_ROLE_FAILED").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_encodes_credentials() {
        let header = basic_auth_header("agent@shield", "p:ss word");
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, "agent%40shield:p%3Ass+word");
    }

    #[test]
    fn test_parse_auth_cookie() {
        let headers = [
            "twoFactorAuth=; Path=/",
            "auth=authcookie_123abc; Max-Age=604800; Path=/; HttpOnly",
        ];
        assert_eq!(
            parse_auth_cookie(headers.into_iter()).as_deref(),
            Some("authcookie_123abc")
        );
        assert_eq!(parse_auth_cookie(["auth=; Path=/"].into_iter()), None);
    }

    #[test]
    fn test_already_requested_detection() {
        assert!(is_already_requested(
            r#"{"error":{"message":"Friend request already sent","status_code":400}}"#
        ));
        assert!(!is_already_requested(
            r#"{"error":{"message":"You can't friend yourself","status_code":400}}"#
        ));
    }

    #[test]
    fn test_withdrawal_status() {
        assert!(is_withdrawn(StatusCode::OK));
        assert!(is_withdrawn(StatusCode::NOT_FOUND));
        assert!(!is_withdrawn(StatusCode::FORBIDDEN));
        assert!(!is_withdrawn(StatusCode::INTERNAL_SERVER_ERROR));
    }
}

// Publishes the whitelist file through the GitHub contents API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::github_app::GithubAppAuth;
use crate::config::WhitelistConfig;
use crate::core::errors::{BotError, BotResult};
use crate::core::whitelist::{PublishOutcome, WhitelistPublisher};

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

pub struct GithubWhitelistRepo {
    auth: Arc<GithubAppAuth>,
    config: WhitelistConfig,
}

impl GithubWhitelistRepo {
    pub fn new(auth: Arc<GithubAppAuth>, config: WhitelistConfig) -> Self {
        Self { auth, config }
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.auth.base_url(),
            self.config.owner,
            self.config.repo,
            self.config.path
        )
    }

    /// Current file and its blob sha, or None if it does not exist yet.
    async fn fetch_current(&self, token: &str) -> BotResult<Option<(String, String)>> {
        let response = self
            .auth
            .client()
            .get(self.contents_url())
            .query(&[("ref", self.config.branch.as_str())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| BotError::whitelist("GITHUB_REQUEST_FAILED", e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BotError::whitelist(
                "GITHUB_READ_FAILED",
                format!("Reading the whitelist failed ({})", response.status()),
            ));
        }

        let body: ContentResponse = response
            .json()
            .await
            .map_err(|e| BotError::whitelist("GITHUB_BAD_RESPONSE", e.to_string()))?;
        let text = decode_content(&body.content)?;
        Ok(Some((body.sha, text)))
    }
}

/// GitHub wraps base64 content at 60 columns.
fn decode_content(content: &str) -> BotResult<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| BotError::whitelist("GITHUB_BAD_CONTENT", e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| BotError::whitelist("GITHUB_BAD_CONTENT", e.to_string()))
}

#[async_trait]
impl WhitelistPublisher for GithubWhitelistRepo {
    async fn publish(&self, content: &str) -> BotResult<PublishOutcome> {
        let token = self.auth.installation_token().await?;
        let current = self.fetch_current(&token).await?;

        if let Some((_, existing)) = &current {
            if existing == content {
                return Ok(PublishOutcome::Unchanged);
            }
        }

        let request = PutContentRequest {
            message: "Update whitelist",
            content: STANDARD.encode(content),
            branch: &self.config.branch,
            sha: current.as_ref().map(|(sha, _)| sha.as_str()),
        };
        let response = self
            .auth
            .client()
            .put(self.contents_url())
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| BotError::whitelist("GITHUB_REQUEST_FAILED", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::whitelist(
                "GITHUB_WRITE_FAILED",
                format!("Writing the whitelist failed ({})", status),
            )
            .with_context("path", &self.config.path)
            .with_context("body", body));
        }

        let body: PutContentResponse = response
            .json()
            .await
            .map_err(|e| BotError::whitelist("GITHUB_BAD_RESPONSE", e.to_string()))?;
        tracing::info!(path = %self.config.path, commit = %body.commit.sha, "Whitelist committed");
        Ok(PublishOutcome::Updated {
            commit_sha: body.commit.sha,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wrapped_content() {
        let encoded = STANDARD.encode("# S.H.I.E.L.D. whitelist\nAlpha\n");
        let wrapped = format!("{}\n{}\n", &encoded[..20], &encoded[20..]);
        assert_eq!(
            decode_content(&wrapped).unwrap(),
            "# S.H.I.E.L.D. whitelist\nAlpha\n"
        );
        assert!(decode_content("***").is_err());
    }

    #[test]
    fn test_put_body_omits_sha_for_new_file() {
        let request = PutContentRequest {
            message: "Update whitelist",
            content: STANDARD.encode("x"),
            branch: "main",
            sha: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("sha").is_none());
        assert_eq!(json["content"], "eA==");
    }
}

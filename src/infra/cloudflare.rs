// Cloudflare cache purge for the public whitelist URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::CloudflareConfig;
use crate::core::errors::{BotError, BotResult};
use crate::core::whitelist::CachePurger;

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

pub struct CloudflarePurger {
    client: Client,
    config: CloudflareConfig,
    url: String,
}

impl CloudflarePurger {
    pub fn new(config: CloudflareConfig, url: String) -> BotResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| BotError::whitelist("HTTP_CLIENT", e.to_string()))?;
        Ok(Self {
            client,
            config,
            url,
        })
    }
}

#[async_trait]
impl CachePurger for CloudflarePurger {
    async fn purge(&self) -> BotResult<()> {
        let endpoint = format!(
            "https://api.cloudflare.com/client/v4/zones/{}/purge_cache",
            self.config.zone_id
        );
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_token)
            .json(&json!({ "files": [self.url] }))
            .send()
            .await
            .map_err(|e| BotError::whitelist("CLOUDFLARE_REQUEST_FAILED", e.to_string()))?;

        let status = response.status();
        let body: PurgeResponse = response
            .json()
            .await
            .map_err(|e| BotError::whitelist("CLOUDFLARE_BAD_RESPONSE", e.to_string()))?;

        if !status.is_success() || !body.success {
            return Err(BotError::whitelist(
                "CLOUDFLARE_PURGE_FAILED",
                format!("Cloudflare refused the purge ({})", status),
            )
            .with_context("errors", serde_json::Value::Array(body.errors)));
        }

        tracing::info!(url = %self.url, "Purged whitelist from Cloudflare cache");
        Ok(())
    }
}

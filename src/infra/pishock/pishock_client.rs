// PiShock HTTP API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::PiShockConfig;
use crate::core::errors::{BotError, BotResult};
use crate::core::pishock::{OperateRequest, PiShockApi};

const OPERATE_URL: &str = "https://do.pishock.com/api/apioperate";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OperateBody<'a> {
    username: &'a str,
    name: &'a str,
    code: &'a str,
    intensity: u8,
    duration: u8,
    apikey: &'a str,
    op: u8,
}

pub struct PiShockClient {
    client: Client,
    config: PiShockConfig,
}

impl PiShockClient {
    pub fn new(config: PiShockConfig) -> BotResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| BotError::pishock("HTTP_CLIENT", e.to_string()))?;
        Ok(Self { client, config })
    }

    fn body<'a>(&'a self, request: &'a OperateRequest) -> OperateBody<'a> {
        OperateBody {
            username: &self.config.username,
            name: &request.operator_name,
            code: &request.share_code,
            intensity: request.intensity,
            duration: request.duration,
            apikey: &self.config.api_key,
            op: request.op.code(),
        }
    }
}

/// PiShock answers 200 with a plain-text verdict; only this one means it fired.
fn is_success(text: &str) -> bool {
    text.contains("Succeeded")
}

#[async_trait]
impl PiShockApi for PiShockClient {
    async fn operate(&self, request: &OperateRequest) -> BotResult<()> {
        let response = self
            .client
            .post(OPERATE_URL)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| BotError::pishock("PISHOCK_REQUEST_FAILED", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BotError::pishock("PISHOCK_BAD_RESPONSE", e.to_string()))?;

        if !status.is_success() || !is_success(&text) {
            return Err(BotError::pishock(
                "PISHOCK_REJECTED",
                format!("PiShock refused the {}: {}", request.op, text.trim()),
            ));
        }

        tracing::info!(op = %request.op, intensity = request.intensity, "PiShock operated");
        Ok(())
    }
}

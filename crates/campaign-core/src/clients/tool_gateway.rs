//! Tool-invocation gateway exposing named campaign operations

use crate::config::ToolGatewayConfig;
use crate::error::{CampaignError, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named operation plus its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub operation: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            arguments: Map::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

/// Text or structured payload returned by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub operation: String,
    pub payload: Value,
}

impl ToolResponse {
    pub fn as_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse>;
}

/// Gateway reached over HTTP at `POST {base}/tools/{operation}`
pub struct HttpToolGateway {
    base_url: String,
    http_client: HttpClient,
}

impl HttpToolGateway {
    pub fn new(base_url: impl Into<String>, timeout_seconds: u64) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// `None` when no gateway is configured
    pub fn from_config(config: &ToolGatewayConfig) -> Result<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, config.timeout_seconds))
            .transpose()
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
        let url = format!("{}/tools/{}", self.base_url, request.operation);
        log::debug!("Invoking tool {}", request.operation);

        let response = self
            .http_client
            .post(&url)
            .json(&request.arguments)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CampaignError::ToolGateway(format!(
                "{} returned {}: {}",
                request.operation, status, body
            )));
        }

        let text = response.text().await?;
        let payload = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ToolResponse {
            operation: request.operation,
            payload,
        })
    }
}

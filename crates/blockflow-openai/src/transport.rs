//! HTTP delivery of driver-built payloads: POST with bearer auth, status
//! and body checks, JSON response parsing.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use blockflow_core::provider::{ProviderError, ProviderId, ProviderTransport};

use crate::config::OpenAiConfig;

/// `reqwest`-based transport for OpenAI-compatible chat-completions
/// endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl HttpTransport {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(
        &self,
        provider: &ProviderId,
        payload: Value,
        api_key: &str,
    ) -> Result<Value, ProviderError> {
        let url = self.config.chat_completions_url();
        debug!(provider = %provider, %url, "sending provider request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ProviderError::transport(provider.clone(), format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider.clone(),
                format!("request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            ProviderError::protocol(provider.clone(), format!("response is not valid JSON: {e}"))
        })
    }
}

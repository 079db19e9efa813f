// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use frame_contracts::{GenerationRequest, ProviderError, ProviderResult};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::ModelProvider;

#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout_seconds: Option<u32>,
    ) -> ProviderResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::Authentication(
                "OpenAI API key is empty".to_string(),
            ));
        }
        let timeout = Duration::from_secs(timeout_seconds.unwrap_or(60).into());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.into(),
            timeout,
            max_retries: 2,
        })
    }

    fn build_payload(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });

        let config = &request.generation_config;
        if let Some(max_tokens) = config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = config.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &config.stop_sequences {
            payload["stop"] = json!(stop);
        }

        payload
    }

    async fn execute_with_retry(&self, payload: Value) -> ProviderResult<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(attempt = attempt + 1, "Sending request to OpenAI API");
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.json::<Value>().await {
                            Ok(data) => return Ok(data),
                            Err(e) => {
                                last_error = Some(ProviderError::Serialisation(format!(
                                    "Failed to parse JSON response: {e}"
                                )));
                            }
                        }
                    } else if status == 401 {
                        return Err(ProviderError::Authentication(
                            "OpenAI rejected the API key".to_string(),
                        ));
                    } else if status == 429 {
                        let wait_time = Duration::from_secs(2_u64.pow(attempt.min(5)));
                        warn!("Rate limited by OpenAI API, waiting {:?}", wait_time);
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(ProviderError::RateLimit);
                    } else {
                        let error_body = resp.text().await.unwrap_or_default();
                        last_error = Some(ProviderError::Provider(format!(
                            "OpenAI API error {status}: {error_body}"
                        )));
                        if status.is_client_error() {
                            break;
                        }
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!("Request to OpenAI API timed out after {:?}", self.timeout);
                    last_error = Some(ProviderError::Timeout);
                }
                Err(e) => {
                    last_error = Some(ProviderError::Network(format!("Request failed: {e}")));
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt.min(3)))).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<String> {
        let payload = self.build_payload(&request);
        let data = self.execute_with_retry(payload).await?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProviderError::Provider("Failed to extract content from OpenAI response".to_string())
            })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("Health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Provider(format!(
                "OpenAI health check returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(OpenAIProvider::new("", "gpt-4o-mini", None, None).is_err());
    }

    #[test]
    fn test_payload_shape() {
        let provider = OpenAIProvider::new("sk-test", "gpt-4o-mini", None, Some(30)).unwrap();
        let request = GenerationRequest::new("hi", None);
        let payload = provider.build_payload(&request);
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["temperature"], 0.2f32);
    }
}

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
use frame_contracts::{GenerationRequest, Message, ProviderError, ProviderResult};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::ModelProvider;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(
        base_url: Option<String>,
        model: impl Into<String>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> ProviderResult<Self> {
        let timeout = Duration::from_secs(timeout_seconds.unwrap_or(60).into());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.into(),
            timeout,
            max_retries: max_retries.unwrap_or(2),
        })
    }

    fn build_payload(&self, request: &GenerationRequest) -> Value {
        let mut messages: Vec<Message> = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let mut payload = json!({
            "model": self.model,
            "messages": messages.iter().map(|msg| {
                json!({
                    "role": msg.role,
                    "content": msg.content
                })
            }).collect::<Vec<_>>(),
            "stream": false
        });

        let config = &request.generation_config;
        if let Some(max_tokens) = config.max_tokens {
            payload["options"] = json!({ "num_predict": max_tokens });
        }
        if let Some(temperature) = config.temperature {
            if payload["options"].is_null() {
                payload["options"] = json!({});
            }
            payload["options"]["temperature"] = json!(temperature);
        }
        if let Some(top_p) = config.top_p {
            if payload["options"].is_null() {
                payload["options"] = json!({});
            }
            payload["options"]["top_p"] = json!(top_p);
        }
        if let Some(stop) = &config.stop_sequences {
            if payload["options"].is_null() {
                payload["options"] = json!({});
            }
            payload["options"]["stop"] = json!(stop);
        }

        payload
    }

    async fn execute_with_retry(&self, payload: Value, endpoint: &str) -> ProviderResult<Value> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(
                attempt = attempt + 1,
                max_retries = self.max_retries + 1,
                "Sending request to Ollama API"
            );

            let url = format!("{}{}", self.base_url, endpoint);
            let response = tokio::time::timeout(
                self.timeout,
                self.client
                    .post(&url)
                    .header("content-type", "application/json")
                    .json(&payload)
                    .send(),
            )
            .await;

            match response {
                Ok(Ok(resp)) => {
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
                    } else if status == 429 {
                        let wait_time = Duration::from_secs(2_u64.pow(attempt.min(5)));
                        warn!("Rate limited by Ollama API, waiting {:?}", wait_time);
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(ProviderError::RateLimit);
                    } else {
                        let error_body = resp.text().await.unwrap_or_default();
                        last_error = Some(ProviderError::Provider(format!(
                            "Ollama API error {status}: {error_body}"
                        )));
                        if status.is_client_error() {
                            break;
                        }
                    }
                }
                Ok(Err(e)) => {
                    last_error = Some(ProviderError::Network(format!("Request failed: {e}")));
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt.min(3)))).await;
                    }
                }
                Err(_) => {
                    warn!("Request to Ollama API timed out after {:?}", self.timeout);
                    last_error = Some(ProviderError::Timeout);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<String> {
        let payload = self.build_payload(&request);
        let data = self.execute_with_retry(payload, "/api/chat").await?;
        data["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProviderError::Provider("Failed to extract content from Ollama response".to_string())
            })
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("Health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Provider(format!(
                "Ollama health check returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_system_and_options() {
        let provider =
            OllamaProvider::new(None, "llama3.2", Some(30), Some(1)).unwrap();
        let mut request = GenerationRequest::new("question", Some("rules".to_string()));
        request.generation_config.max_tokens = Some(256);
        let payload = provider.build_payload(&request);
        assert_eq!(payload["model"], "llama3.2");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "question");
        assert_eq!(payload["options"]["num_predict"], 256);
        assert_eq!(payload["stream"], false);
    }
}

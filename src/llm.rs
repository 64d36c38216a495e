//! OpenAI-compatible chat completion client.
//!
//! Implements the core [`ChatModel`] trait against `POST {base_url}/chat/completions`,
//! which covers OpenAI, vLLM, LM Studio, Ollama's `/v1` endpoint and most
//! hosted gateways. Each prompt is sent as a single user message.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

pub use multi_kb_rag_core::llm::ChatModel;

use crate::config::LlmConfig;

pub struct OpenAiChatModel {
    model: String,
    url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    /// The API key is optional: local gateways usually accept anonymous calls.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            debug!(env = %config.api_key_env, "no LLM API key set, calling without auth");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            model: config.model.clone(),
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .context("LLM returned invalid JSON")?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "LLM transient error");
                        last_err = Some(anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) if e.is_timeout() => {
                    bail!("LLM call timed out: {}", e);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "LLM connection error");
                    last_err = Some(anyhow!("LLM connection error: {}", e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("LLM call failed after retries")))
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_choice() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  The fee is 500 baht. " } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "The fee is 500 baht.");
    }

    #[test]
    fn missing_content_is_an_error() {
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn url_is_joined_without_double_slash() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1/".into(),
            model: "llama3.1".into(),
            api_key_env: "MKB_TEST_UNSET_LLM_KEY".into(),
            max_tokens: 1500,
            temperature: 0.5,
            timeout_secs: 120,
            max_retries: 0,
        };
        let m = OpenAiChatModel::new(&config).unwrap();
        assert_eq!(m.url, "http://localhost:11434/v1/chat/completions");
        assert!(m.api_key.is_none());
    }
}

//! OpenAI-compatible chat-completions client.
//!
//! Works against the OpenAI API and any endpoint speaking the same wire
//! format (OpenRouter, Ollama's `/v1`, vLLM, ...). The engine only needs
//! plain completions, so the request surface is deliberately small.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::llm::LanguageModel;
use crate::types::{AppError, Result};

/// Chat-completions client over `reqwest`.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatClient {
    /// Build a client from config, reading the API key from the configured
    /// environment variable (empty key is allowed for keyless local
    /// endpoints).
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        Self::new(
            config.api_base.clone(),
            api_key,
            config.model.clone(),
            config.temperature,
            config.max_tokens,
        )
    }

    /// Build a client from explicit parts.
    pub fn new(
        api_base: String,
        api_key: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature,
            max_tokens,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiCompatClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "Endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Malformed response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::Llm("Empty completion".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_is_normalized() {
        let client = OpenAiCompatClient::new(
            "https://api.example.com/v1/".to_string(),
            "key".to_string(),
            "test-model".to_string(),
            0.2,
            512,
        );
        assert_eq!(client.api_base, "https://api.example.com/v1");
        assert_eq!(client.model_name(), "test-model");
    }

    #[test]
    fn test_request_serializes_expected_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.0,
            max_tokens: 16,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 16);
    }
}

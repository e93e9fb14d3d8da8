use super::{ChatMessage, LLM, LLMProvider, LLMResponse};
use crate::config::LLMConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const LMSTUDIO_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Shared client for OpenAI-compatible chat-completions endpoints.
struct ChatCompletionsClient {
    endpoint: String,
    api_key: Option<String>,
    config: LLMConfig,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    fn new(endpoint: String, api_key: Option<String>, config: LLMConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            endpoint,
            api_key,
            config,
            client,
        })
    }

    fn request_body(&self, messages: Vec<ChatMessage>, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Sending chat request to {}", self.endpoint);
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error {}: {}", status, text));
        }

        Ok(response)
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        let body = self.request_body(messages, false);
        let response = self.send(&body).await?;

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("No content in LLM response"))?;

        Ok(LLMResponse {
            content,
            tokens_used: completion.usage.map(|u| u.total_tokens),
        })
    }

    /// Stream incremental text chunks. SSE `data:` lines are parsed until the
    /// `[DONE]` end-of-stream marker; the channel is closed afterwards.
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let body = self.request_body(messages, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel::<Result<String>>(64);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("stream read failed: {}", e))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim();

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let delta = chunk
                                .choices
                                .first()
                                .and_then(|c| c.delta.content.clone());
                            if let Some(text) = delta {
                                if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Skipping unparsable stream chunk: {}", e);
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn is_available(&self) -> bool {
        // Probe the sibling models endpoint
        let models_endpoint = self.endpoint.replace("/chat/completions", "/models");
        let mut request = self.client.get(&models_endpoint);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    inner: ChatCompletionsClient,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("OpenAI API key required"))?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| OPENAI_ENDPOINT.to_string());

        Ok(Self {
            inner: ChatCompletionsClient::new(endpoint, Some(api_key), config)?,
        })
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        self.inner.chat(messages).await
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        self.inner.chat_stream(messages).await
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }
}

/// LMStudio provider implementation (local OpenAI-compatible server, no key)
pub struct LMStudioProvider {
    inner: ChatCompletionsClient,
}

impl LMStudioProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| LMSTUDIO_ENDPOINT.to_string());

        Ok(Self {
            inner: ChatCompletionsClient::new(endpoint, config.api_key.clone(), config)?,
        })
    }
}

#[async_trait]
impl LLM for LMStudioProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        self.inner.chat(messages).await
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        self.inner.chat_stream(messages).await
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_api_key() {
        let config = LLMConfig {
            api_key: None,
            ..LLMConfig::default()
        };
        assert!(OpenAIProvider::new(config).is_err());
    }

    #[test]
    fn test_lmstudio_needs_no_key() {
        let config = LLMConfig {
            provider: LLMProvider::LMStudio,
            api_key: None,
            ..LLMConfig::default()
        };
        assert!(LMStudioProvider::new(config).is_ok());
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));

        // Final chunk often has an empty delta
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}

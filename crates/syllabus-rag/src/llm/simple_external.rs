//! External API provider for OpenAI-compatible chat-completion endpoints,
//! with real SSE streaming.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{ApiProvider, GenerationConfig, LLMProvider, ProviderInfo, TokenStream};

/// External API provider (simplified for reliability)
pub struct SimpleExternalProvider {
    provider: ApiProvider,
    api_key: String,
    model: String,
    client: Client,
}

/// One parsed server-sent-event line of a chat-completion stream.
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

impl SimpleExternalProvider {
    /// Parse a response body as JSON, returning a clear error if the server returned HTML
    /// (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}). Response: {}",
                endpoint,
                status,
                preview
            ));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!(
                "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
                endpoint,
                status,
                e,
                preview
            )
        })
    }

    pub fn new(provider: ApiProvider, api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        tracing::info!(
            provider = ?provider,
            model = %model,
            "Creating SimpleExternalProvider (connect_timeout=15s)"
        );

        Ok(Self {
            provider,
            api_key,
            model,
            client,
        })
    }

    fn request_body(&self, prompt: &str, config: &GenerationConfig, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": stream
        });
        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let endpoint = self.provider.chat_endpoint();
        self.client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::error!(endpoint = %endpoint, "Request timed out");
                    anyhow!("Request to {} timed out", endpoint)
                } else if e.is_connect() {
                    tracing::error!(endpoint = %endpoint, error = %e, "Connection failed");
                    anyhow!("Failed to connect to {}: {}", endpoint, e)
                } else {
                    tracing::error!(endpoint = %endpoint, error = %e, "Request failed");
                    anyhow!("Request to {} failed: {}", endpoint, e)
                }
            })
    }

    fn parse_sse_line(line: &str) -> SseLine {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return SseLine::Skip;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return SseLine::Done;
        }
        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(parsed) => match parsed["choices"][0]["delta"]["content"].as_str() {
                Some(content) if !content.is_empty() => SseLine::Token(content.to_string()),
                _ => SseLine::Skip,
            },
            Err(_) => SseLine::Skip,
        }
    }
}

#[async_trait]
impl LLMProvider for SimpleExternalProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let endpoint = self.provider.chat_endpoint();
        tracing::debug!(
            endpoint = %endpoint,
            model = %self.model,
            max_tokens = config.max_tokens,
            prompt_len = prompt.len(),
            "Sending OpenAI-compatible request"
        );

        let response = self.send(&self.request_body(prompt, config, false)).await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            tracing::error!(endpoint = %endpoint, status = %status, error = %error, "API returned error");
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: OpenAIResponse = Self::parse_json_response(response, &endpoint).await?;
        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No choices returned from API"))?;

        tracing::debug!("API response received, {} chars", choice.message.content.len());
        Ok(choice.message.content)
    }

    /// Real SSE streaming. Transport errors after the first byte are forwarded
    /// as an `Err` item so the caller can abort its own stream.
    async fn generate_stream(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<TokenStream> {
        use futures::StreamExt;

        let endpoint = self.provider.chat_endpoint();
        let response = self.send(&self.request_body(prompt, config, true)).await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !status.is_success() || content_type.contains("text/html") {
            let error = response.text().await?;
            let preview: String = error.chars().take(300).collect();
            return Err(anyhow!(
                "API streaming error (HTTP {}, content-type: {}): {}",
                status,
                content_type,
                preview
            ));
        }

        let (sender, receiver) = tokio::sync::mpsc::channel::<Result<String>>(256);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            // Raw bytes, so multi-byte characters split across chunks survive.
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let next = tokio::select! {
                    _ = sender.closed() => {
                        tracing::debug!(endpoint = %endpoint, "Token receiver dropped, closing SSE connection");
                        return;
                    }
                    next = byte_stream.next() => next,
                };
                let Some(chunk_result) = next else { break };
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "SSE stream interrupted");
                        let _ = sender
                            .send(Err(anyhow!("stream from {} interrupted: {}", endpoint, e)))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&line);

                    match Self::parse_sse_line(&line) {
                        SseLine::Token(token) => {
                            // Receiver gone means the caller stopped listening; drop the connection.
                            if sender.send(Ok(token)).await.is_err() {
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Ok(TokenStream::new(receiver))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.provider.name().to_string(),
            model: self.model.clone(),
            supports_streaming: true,
        }
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: String,
}

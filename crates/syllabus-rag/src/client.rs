//! HTTP client for the answer endpoint.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::stream::{ContentUpdate, DecodedAnswer, StreamDecoder};
use crate::types::ChatRequest;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
}

impl ChatClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
        })
    }

    /// Post `request` and decode the streamed answer, calling `on_update`
    /// with the running content after each chunk.
    ///
    /// A transport failure after the body started is not an error: the
    /// partial content comes back with `completed == false` and no citations.
    pub async fn ask<F>(&self, request: &ChatRequest, mut on_update: F) -> Result<DecodedAnswer, ClientError>
    where
        F: FnMut(&ContentUpdate),
    {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(ClientError::Rejected { status, message });
        }

        let mut decoder = StreamDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Some(update) = decoder.feed(&bytes) {
                        on_update(&update);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Answer stream aborted by transport");
                    return Ok(decoder.abort());
                }
            }
        }

        Ok(decoder.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_joined() {
        let client = ChatClient::new("http://localhost:3000/").unwrap();
        assert_eq!(client.endpoint, "http://localhost:3000/api/chat");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = ChatClient::new("http://127.0.0.1:1").unwrap();
        let err = client
            .ask(&ChatRequest::new("What is a gene?", "biology"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}

//! Streaming response handling for LLM generation

use anyhow::Result;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Token stream for streaming generation.
///
/// Items are `Err` when the upstream connection fails mid-generation; the
/// stream ends after yielding such an item.
pub struct TokenStream {
    receiver: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<Result<String>>) -> Self {
        Self { receiver }
    }

    /// Stream that yields the given tokens in order, then ends.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let (sender, receiver) = mpsc::channel(tokens.len().max(1));
        for token in tokens {
            // capacity covers every token, so this never blocks
            let _ = sender.try_send(Ok(token));
        }
        Self::new(receiver)
    }

    /// Get next token
    pub async fn next(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await
    }

    /// Collect all tokens into a string, stopping at the first error.
    pub async fn collect(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(token) = self.next().await {
            result.push_str(&token?);
        }
        Ok(result)
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_tokens_preserves_order() {
        let stream = TokenStream::from_tokens(["Photo", "synthesis", " is"]);
        assert_eq!(stream.collect().await.unwrap(), "Photosynthesis is");
    }

    #[tokio::test]
    async fn test_collect_stops_on_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("partial".to_string())).await.unwrap();
        tx.send(Err(anyhow::anyhow!("connection reset"))).await.unwrap();
        drop(tx);
        let err = TokenStream::new(rx).collect().await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}

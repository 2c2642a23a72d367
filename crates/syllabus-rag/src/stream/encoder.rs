use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{EncodeError, Frame, StreamAbort, SENTINEL};
use crate::types::Citation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Content,
    Metadata,
    Closed,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Metadata => "metadata",
            Self::Closed => "closed",
        }
    }
}

/// Producer half of the answer protocol.
///
/// Content may be written until [`finish`](Self::finish) emits the sentinel
/// and the citation JSON; after that every write is rejected.
pub struct StreamEncoder {
    tx: mpsc::Sender<Frame>,
    phase: Phase,
    content_bytes: usize,
}

impl StreamEncoder {
    pub(crate) fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx,
            phase: Phase::Content,
            content_bytes: 0,
        }
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), EncodeError> {
        if self.tx.send(Ok(bytes)).await.is_err() {
            self.phase = Phase::Closed;
            return Err(EncodeError::Disconnected);
        }
        Ok(())
    }

    /// Forward one run of answer text. A literal sentinel inside a single
    /// token is stripped so the client cannot mistake it for the boundary.
    pub async fn write_content(&mut self, text: &str) -> Result<(), EncodeError> {
        if self.phase != Phase::Content {
            return Err(EncodeError::OutOfPhase {
                attempted: "content",
                phase: self.phase.name(),
            });
        }
        if text.is_empty() {
            return Ok(());
        }

        let bytes = if text.contains(SENTINEL) {
            tracing::warn!("Generated text contained the stream sentinel, stripping it");
            Bytes::from(text.replace(SENTINEL, ""))
        } else {
            Bytes::copy_from_slice(text.as_bytes())
        };
        if bytes.is_empty() {
            return Ok(());
        }

        self.content_bytes += bytes.len();
        self.send(bytes).await
    }

    /// Write `message` one character per frame, matching token-by-token delivery.
    pub async fn write_redirect(&mut self, message: &str) -> Result<(), EncodeError> {
        let mut buf = [0u8; 4];
        for ch in message.chars() {
            self.write_content(ch.encode_utf8(&mut buf)).await?;
        }
        Ok(())
    }

    /// Emit the sentinel, wait `delay`, then the citation list as JSON, and close.
    pub async fn finish(&mut self, citations: &[Citation], delay: Duration) -> Result<(), EncodeError> {
        if self.phase != Phase::Content {
            return Err(EncodeError::OutOfPhase {
                attempted: "sentinel",
                phase: self.phase.name(),
            });
        }
        let metadata = serde_json::to_vec(citations)?;

        self.send(Bytes::from_static(SENTINEL.as_bytes())).await?;
        self.phase = Phase::Metadata;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.send(Bytes::from(metadata)).await?;
        self.phase = Phase::Closed;

        tracing::debug!(
            content_bytes = self.content_bytes,
            citations = citations.len(),
            "Answer stream finalized"
        );
        Ok(())
    }

    /// Abort the transport. No sentinel or metadata follows. Best effort: a
    /// client that already left gets nothing.
    pub async fn abort(&mut self, reason: impl Into<String>) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        let _ = self
            .tx
            .send(Err(StreamAbort {
                reason: reason.into(),
            }))
            .await;
    }

    /// Resolves once the consumer has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn content_bytes(&self) -> usize {
        self.content_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame_channel;
    use super::*;

    fn citation(n: u32) -> Citation {
        Citation {
            content: format!("passage {}", n),
            subtopic: "Electricity".to_string(),
            unit_number: n,
            source_file: "physics.pdf".to_string(),
            page_start: 10,
            page_end: 11,
            content_type: "text".to_string(),
            image_url: None,
            latex: Some("V = IR".to_string()),
        }
    }

    #[tokio::test]
    async fn test_content_then_sentinel_then_metadata() {
        let (mut encoder, stream) = frame_channel(16);
        let handle = tokio::spawn(async move {
            encoder.write_content("Ohm's ").await.unwrap();
            encoder.write_content("law").await.unwrap();
            encoder.finish(&[citation(1)], Duration::ZERO).await.unwrap();
            assert!(encoder.is_finished());
        });

        let body = String::from_utf8(stream.into_bytes().await.unwrap()).unwrap();
        handle.await.unwrap();

        let (content, metadata) = body.split_once(SENTINEL).unwrap();
        assert_eq!(content, "Ohm's law");
        let parsed: Vec<Citation> = serde_json::from_str(metadata).unwrap();
        assert_eq!(parsed, vec![citation(1)]);
        assert!(!metadata.contains("image_url"));
    }

    #[tokio::test]
    async fn test_empty_citations_serialize_as_empty_array() {
        let (mut encoder, stream) = frame_channel(4);
        encoder.finish(&[], Duration::ZERO).await.unwrap();
        drop(encoder);
        assert_eq!(stream.into_bytes().await.unwrap(), b"tokens-ended[]");
    }

    #[tokio::test]
    async fn test_writes_after_finish_are_rejected() {
        let (mut encoder, _stream) = frame_channel(4);
        encoder.finish(&[], Duration::ZERO).await.unwrap();
        assert!(matches!(
            encoder.write_content("late").await,
            Err(EncodeError::OutOfPhase { attempted: "content", .. })
        ));
        assert!(encoder.finish(&[], Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_redirect_is_written_per_character() {
        let (mut encoder, mut stream) = frame_channel(64);
        encoder.write_redirect("Hé!").await.unwrap();
        drop(encoder);

        let mut frames = Vec::new();
        while let Some(frame) = futures::StreamExt::next(&mut stream).await {
            frames.push(frame.unwrap());
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[1][..], "é".as_bytes());
    }

    #[tokio::test]
    async fn test_sentinel_inside_token_is_stripped() {
        let (mut encoder, stream) = frame_channel(4);
        encoder.write_content("before tokens-ended after").await.unwrap();
        drop(encoder);
        assert_eq!(stream.into_bytes().await.unwrap(), b"before  after");
    }

    #[tokio::test]
    async fn test_disconnect_is_reported() {
        let (mut encoder, stream) = frame_channel(4);
        drop(stream);
        assert!(matches!(
            encoder.write_content("x").await,
            Err(EncodeError::Disconnected)
        ));
        encoder.closed().await;
    }

    #[tokio::test]
    async fn test_abort_ends_body_with_error() {
        let (mut encoder, stream) = frame_channel(4);
        encoder.write_content("partial").await.unwrap();
        encoder.abort("upstream reset").await;
        assert!(encoder.is_finished());
        drop(encoder);
        let err = stream.into_bytes().await.unwrap_err();
        assert_eq!(err.reason, "upstream reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_waits_for_delay_after_sentinel() {
        use futures::{FutureExt, StreamExt};

        let (mut encoder, mut stream) = frame_channel(8);
        let start = tokio::time::Instant::now();
        let writer = tokio::spawn(async move {
            encoder.write_content("V = IR").await.unwrap();
            encoder.finish(&[citation(1)], Duration::from_millis(100)).await
        });

        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"V = IR");
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], SENTINEL.as_bytes());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(stream.next().now_or_never().is_none());

        let metadata = stream.next().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        let parsed: Vec<Citation> = serde_json::from_slice(&metadata).unwrap();
        assert_eq!(parsed, vec![citation(1)]);

        writer.await.unwrap().unwrap();
        assert!(stream.next().await.is_none());
    }
}

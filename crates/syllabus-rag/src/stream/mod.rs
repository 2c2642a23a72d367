//! Answer wire protocol.
//!
//! One response body carries `content* SENTINEL metadata`: raw UTF-8 answer
//! text, the reserved literal [`SENTINEL`], then the citation list as JSON.
//! There is no other framing.

pub mod decoder;
pub mod encoder;

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

pub use decoder::{ContentUpdate, DecodedAnswer, StreamDecoder};
pub use encoder::StreamEncoder;

/// Separates answer text from the trailing citation JSON.
pub const SENTINEL: &str = "tokens-ended";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("client disconnected")]
    Disconnected,

    #[error("cannot write {attempted} in the {phase} phase")]
    OutOfPhase {
        attempted: &'static str,
        phase: &'static str,
    },

    #[error("failed to serialize citations: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Terminal frame telling the transport to abort instead of ending cleanly.
#[derive(Debug, Clone, Error)]
#[error("answer stream aborted: {reason}")]
pub struct StreamAbort {
    pub reason: String,
}

pub type Frame = Result<Bytes, StreamAbort>;

/// Bounded channel between the pipeline task and the HTTP body.
pub fn frame_channel(capacity: usize) -> (StreamEncoder, AnswerStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (StreamEncoder::new(tx), AnswerStream { rx })
}

/// Body side of the frame channel. Dropping it cancels the producer.
pub struct AnswerStream {
    rx: mpsc::Receiver<Frame>,
}

impl AnswerStream {
    /// Drain the whole body. Stops at the first abort frame.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>, StreamAbort> {
        let mut body = Vec::new();
        while let Some(frame) = self.rx.recv().await {
            body.extend_from_slice(&frame?);
        }
        Ok(body)
    }
}

impl Stream for AnswerStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

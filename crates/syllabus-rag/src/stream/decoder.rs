//! Chunk-tolerant consumer of the answer protocol.
//!
//! Transport chunking is arbitrary: a chunk may end in the middle of a UTF-8
//! sequence or in the middle of the sentinel. The decoder holds back at most
//! `SENTINEL.len() - 1` bytes (only a tail that could still start the
//! sentinel) plus any incomplete UTF-8 sequence, so every chunking of the same
//! body decodes to the same content and citations.

use super::SENTINEL;
use crate::types::Citation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Streaming,
    BufferingMetadata,
}

/// Running answer text after a chunk. `is_final` is set once, when the
/// sentinel is seen; the content is trimmed at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUpdate {
    pub content: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAnswer {
    pub content: String,
    pub citations: Vec<Citation>,
    /// The sentinel arrived. When false, citations are unknown and empty.
    pub completed: bool,
}

pub struct StreamDecoder {
    state: DecoderState,
    content: String,
    /// Undecided bytes: a possible sentinel prefix and/or a partial UTF-8 sequence.
    pending: Vec<u8>,
    trailing: Vec<u8>,
    sentinel_seen: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Streaming,
            content: String::new(),
            pending: Vec::new(),
            trailing: Vec::new(),
            sentinel_seen: false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sentinel_seen(&self) -> bool {
        self.sentinel_seen
    }

    /// Consume one transport chunk. Returns an update when the visible
    /// content changed or the sentinel was reached.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<ContentUpdate> {
        match self.state {
            DecoderState::BufferingMetadata => {
                self.trailing.extend_from_slice(chunk);
                None
            }
            DecoderState::Streaming => self.feed_content(chunk),
        }
    }

    fn feed_content(&mut self, chunk: &[u8]) -> Option<ContentUpdate> {
        self.pending.extend_from_slice(chunk);
        let sentinel = SENTINEL.as_bytes();

        if let Some(pos) = find_subslice(&self.pending, sentinel) {
            let rest = self.pending.split_off(pos + sentinel.len());
            self.pending.truncate(pos);
            let pre = std::mem::take(&mut self.pending);
            self.content.push_str(&String::from_utf8_lossy(&pre));
            self.content = self.content.trim().to_string();
            self.trailing = rest;
            self.sentinel_seen = true;
            self.state = DecoderState::BufferingMetadata;
            return Some(ContentUpdate {
                content: self.content.clone(),
                is_final: true,
            });
        }

        let hold = partial_sentinel_suffix(&self.pending, sentinel);
        let held = self.pending.split_off(self.pending.len() - hold);
        let (text, carry) = decode_utf8_prefix(&self.pending);
        self.pending = carry;
        self.pending.extend_from_slice(&held);

        if text.is_empty() {
            return None;
        }
        self.content.push_str(&text);
        Some(ContentUpdate {
            content: self.content.clone(),
            is_final: false,
        })
    }

    /// End of stream. Parses the trailing buffer as the citation list; any
    /// parse failure yields an empty list and a logged diagnostic.
    pub fn finish(mut self) -> DecodedAnswer {
        if !self.sentinel_seen {
            self.flush_pending();
            tracing::warn!(
                content_len = self.content.len(),
                "Answer stream ended without sentinel, citations unknown"
            );
            return DecodedAnswer {
                content: self.content,
                citations: Vec::new(),
                completed: false,
            };
        }

        let citations = parse_citations(&self.trailing);
        DecodedAnswer {
            content: self.content,
            citations,
            completed: true,
        }
    }

    /// Transport failed mid-body. Keeps whatever content arrived; citations
    /// are unknown even if part of the metadata was received.
    pub fn abort(mut self) -> DecodedAnswer {
        if !self.sentinel_seen {
            self.flush_pending();
        }
        DecodedAnswer {
            content: self.content,
            citations: Vec::new(),
            completed: false,
        }
    }

    fn flush_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.content.push_str(&String::from_utf8_lossy(&pending));
    }
}

/// Decode every chunk and finish.
pub fn decode_all<I, B>(chunks: I) -> DecodedAnswer
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut decoder = StreamDecoder::new();
    for chunk in chunks {
        decoder.feed(chunk.as_ref());
    }
    decoder.finish()
}

fn parse_citations(trailing: &[u8]) -> Vec<Citation> {
    let text = String::from_utf8_lossy(trailing);
    let text = text.trim();
    if text.is_empty() {
        tracing::debug!("No metadata after sentinel");
        return Vec::new();
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value @ serde_json::Value::Array(_)) => match serde_json::from_value(value) {
            Ok(citations) => citations,
            Err(err) => {
                tracing::warn!(error = %err, "Citation entries have an unexpected shape");
                Vec::new()
            }
        },
        Ok(_) => {
            tracing::warn!("Metadata is not a JSON array, ignoring");
            Vec::new()
        }
        Err(err) => {
            tracing::warn!(error = %err, bytes = trailing.len(), "Failed to parse citation metadata");
            Vec::new()
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest proper prefix of `needle` that ends `haystack`.
fn partial_sentinel_suffix(haystack: &[u8], needle: &[u8]) -> usize {
    let max = needle.len().saturating_sub(1).min(haystack.len());
    (1..=max)
        .rev()
        .find(|&n| haystack[haystack.len() - n..] == needle[..n])
        .unwrap_or(0)
}

/// Split `bytes` into decodable text and an incomplete trailing sequence.
/// Invalid sequences become U+FFFD.
fn decode_utf8_prefix(bytes: &[u8]) -> (String, Vec<u8>) {
    let mut out = String::new();
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return (out, Vec::new());
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                match err.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &rest[valid + bad..];
                    }
                    None => return (out, rest[valid..].to_vec()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "Photosynthesis converts light énergie into chemical energy. tokens-ended[{\"content\":\"Light reactions occur in the thylakoid.\",\"subtopic\":\"Photosynthesis\",\"unit_number\":4,\"source_file\":\"bio_unit4.pdf\",\"page_start\":12,\"page_end\":13,\"content_type\":\"text\"}]";

    fn chunked(body: &[u8], size: usize) -> Vec<Vec<u8>> {
        body.chunks(size).map(<[u8]>::to_vec).collect()
    }

    #[test]
    fn test_single_chunk() {
        let decoded = decode_all([BODY.as_bytes()]);
        assert!(decoded.completed);
        assert_eq!(
            decoded.content,
            "Photosynthesis converts light énergie into chemical energy."
        );
        assert_eq!(decoded.citations.len(), 1);
        assert_eq!(decoded.citations[0].page_start, 12);
    }

    #[test]
    fn test_every_chunking_decodes_identically() {
        let whole = decode_all([BODY.as_bytes()]);
        for size in 1..=BODY.len() {
            let decoded = decode_all(chunked(BODY.as_bytes(), size));
            assert_eq!(decoded, whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_sentinel_split_at_every_offset() {
        let body = b"answer tokens-ended[]";
        let start = 7;
        for split in start + 1..start + SENTINEL.len() {
            let decoded = decode_all([&body[..split], &body[split..]]);
            assert!(decoded.completed, "split at {}", split);
            assert_eq!(decoded.content, "answer");
            assert!(decoded.citations.is_empty());
        }
    }

    #[test]
    fn test_partial_sentinel_is_not_shown_as_content() {
        let mut decoder = StreamDecoder::new();
        let update = decoder.feed(b"Ohm's law tok").unwrap();
        assert_eq!(update.content, "Ohm's law ");
        assert!(!update.is_final);

        let update = decoder.feed(b"ens-ended").unwrap();
        assert!(update.is_final);
        assert_eq!(update.content, "Ohm's law");
        assert_eq!(decoder.state(), DecoderState::BufferingMetadata);
    }

    #[test]
    fn test_near_miss_is_released_as_content() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"tokens-").is_none());
        let update = decoder.feed(b"are words").unwrap();
        assert_eq!(update.content, "tokens-are words");
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let text = "λ = h/p";
        let bytes = text.as_bytes();
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(&bytes[..1]).is_none());
        let update = decoder.feed(&bytes[1..]).unwrap();
        assert_eq!(update.content, text);
    }

    #[test]
    fn test_zero_trailing_bytes_is_empty_list() {
        let decoded = decode_all([b"answer tokens-ended".as_slice()]);
        assert!(decoded.completed);
        assert!(decoded.citations.is_empty());
    }

    #[test]
    fn test_non_array_metadata_is_empty_list() {
        for trailing in ["{\"content\":\"x\"}", "not json", "42", "[{\"bogus\":true}]"] {
            let body = format!("answer tokens-ended{}", trailing);
            let decoded = decode_all([body.as_bytes()]);
            assert!(decoded.citations.is_empty(), "trailing {:?}", trailing);
            assert_eq!(decoded.content, "answer");
        }
    }

    #[test]
    fn test_metadata_chunks_after_sentinel_are_buffered_verbatim() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"ok tokens-ended[");
        assert!(decoder.feed(b"]").is_none());
        assert!(decoder.feed(b" tokens-ended").is_none());
        assert_eq!(decoder.content(), "ok");
        // A second sentinel is metadata, which then fails to parse.
        assert!(decoder.finish().citations.is_empty());
    }

    #[test]
    fn test_stream_without_sentinel() {
        let decoded = decode_all([b"partial answ".as_slice(), b"er tok".as_slice()]);
        assert!(!decoded.completed);
        assert_eq!(decoded.content, "partial answer tok");
        assert!(decoded.citations.is_empty());
    }

    #[test]
    fn test_abort_keeps_partial_content() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"half an ans");
        let decoded = decoder.abort();
        assert_eq!(decoded.content, "half an ans");
        assert!(!decoded.completed);
        assert!(decoded.citations.is_empty());
    }

    #[test]
    fn test_redirect_body() {
        let message = "This question is related to **Physics**, not Biology. Please switch to the **Physics** assistant to get the answer.";
        let mut chunks: Vec<Vec<u8>> = message.chars().map(|c| c.to_string().into_bytes()).collect();
        chunks.push(SENTINEL.as_bytes().to_vec());
        chunks.push(b"[]".to_vec());

        let decoded = decode_all(chunks);
        assert_eq!(decoded.content, message);
        assert!(decoded.citations.is_empty());
        assert!(decoded.completed);
    }
}

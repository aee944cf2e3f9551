//! SSE stream decoding.
//!
//! Provides [`SseDecoder`] for line-buffered extraction of `data:` payloads
//! from OpenAI-compatible SSE streaming responses. Handles TCP chunk
//! boundary reassembly correctly.

/// Sentinel payload marking the end of an OpenAI-compatible stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Lines are buffered up to this size; anything longer is dropped.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Line-buffered SSE decoder.
///
/// Buffers raw bytes across chunk boundaries, reassembles complete SSE
/// lines, and yields the payload of each `data:` line. Field lines other
/// than `data:` (`event:`, `id:`, `retry:`, comments) and blank event
/// delimiters are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create a new decoder with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a chunk of bytes, returning the data payloads of every line
    /// completed by this chunk, in arrival order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            if let Some(payload) = data_payload(&self.buffer[start..end]) {
                payloads.push(payload);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        // An unbounded partial line would otherwise grow without limit.
        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "Dropping oversized partial SSE line"
            );
            self.buffer.clear();
        }

        payloads
    }

    /// Flush any remaining content as a final line.
    ///
    /// Some backends end the stream without a trailing newline after the
    /// last event; this recovers that payload.
    pub fn finish(&mut self) -> Vec<String> {
        let remainder = std::mem::take(&mut self.buffer);
        data_payload(&remainder).into_iter().collect()
    }
}

/// Extract the payload of a `data:` line, or `None` for any other line.
///
/// Tolerates CRLF endings and `data:` without a following space.
fn data_payload(line: &[u8]) -> Option<String> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data).to_string())
}

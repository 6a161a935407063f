//! Server-sent-event decoding for streamed `/chat/completions` responses.

use crate::error::ApiError;
use crate::types::{StreamChunk, ToolCallDelta};
use serde::Deserialize;

/// Incremental SSE framer.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// UTF-8 sequences split across network chunks are never decoded early.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the `data` payload of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = event_data(&String::from_utf8_lossy(&block[..end])) {
                events.push(data);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_data(&String::from_utf8_lossy(&rest))
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

/// Joined `data:` lines of one event block; `None` for comment-only blocks.
fn event_data(block: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

// ---------------------------------------------------------------------------
// Chunk payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: DeltaPayload,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaPayload {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDeltaPayload>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDeltaPayload {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDeltaPayload>,
}

#[derive(Debug, Deserialize)]
struct FunctionDeltaPayload {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse one event payload. `Ok(None)` marks the `[DONE]` sentinel.
pub fn parse_chunk(data: &str) -> Result<Option<StreamChunk>, ApiError> {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return Ok(None);
    }
    let payload: ChunkPayload = serde_json::from_str(trimmed)
        .map_err(|err| ApiError::InvalidResponse(format!("invalid stream chunk: {err}")))?;
    if let Some(error) = payload.error {
        return Err(ApiError::InvalidResponse(format!(
            "stream reported an error: {}",
            error.message
        )));
    }
    let mut chunk = StreamChunk::default();
    // Only the first choice is assembled; n > 1 is never requested.
    if let Some(choice) = payload.choices.into_iter().next() {
        chunk.content = choice.delta.content.filter(|text| !text.is_empty());
        chunk.finish_reason = choice.finish_reason;
        chunk.tool_calls = choice
            .delta
            .tool_calls
            .into_iter()
            .map(|call| {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }
            })
            .collect();
    }
    Ok(Some(chunk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::sse_data_block;

    #[test]
    fn frames_events_across_arbitrary_splits() {
        let mut decoder = SseDecoder::new();
        let stream = format!(
            ": keep-alive\n\n{}{}",
            sse_data_block(r#"{"a":"héllo"}"#),
            sse_data_block("[DONE]")
        );
        let bytes = stream.as_bytes();
        let mut events = Vec::new();
        // One byte at a time splits the two-byte `é`.
        for b in bytes {
            events.extend(decoder.push(std::slice::from_ref(b)));
        }
        assert_eq!(events, vec![r#"{"a":"héllo"}"#.to_string(), "[DONE]".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn crlf_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: x\r\ndata: one\r\ndata:two\r\n\r\n");
        assert_eq!(events, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn unterminated_tail_is_flushed() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn parses_content_and_tool_call_deltas() {
        let chunk = parse_chunk(
            r#"{"choices":[{"index":0,"delta":{"content":"Hi","tool_calls":[{"index":1,"id":"call_9","type":"function","function":{"name":"time","arguments":"{"}}]},"finish_reason":null}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert_eq!(
            chunk.tool_calls,
            vec![ToolCallDelta {
                index: 1,
                id: Some("call_9".into()),
                name: Some("time".into()),
                arguments: Some("{".into()),
            }]
        );
        assert!(chunk.finish_reason.is_none());
    }

    #[test]
    fn done_sentinel_and_errors() {
        assert_eq!(parse_chunk(" [DONE] ").unwrap(), None);
        let err = parse_chunk(r#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
        assert!(parse_chunk("not json").is_err());
    }

    #[test]
    fn empty_choices_yield_empty_chunk() {
        let chunk = parse_chunk(r#"{"choices":[]}"#).unwrap().unwrap();
        assert_eq!(chunk, StreamChunk::default());
    }
}

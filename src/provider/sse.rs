//! Server-Sent Events decoding for upstream chat completion streams

use serde::Deserialize;
use std::borrow::Cow;

/// Terminal `data:` payload of an OpenAI-style stream
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental SSE block splitter
///
/// Bytes arrive in arbitrary network chunks; complete blocks are separated by
/// a blank line. Text is only decoded once a whole block is buffered.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the buffer
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Extract the next complete block, skipping empty ones
    pub fn next_block(&mut self) -> Option<String> {
        loop {
            let (end, consumed) = find_separator(&self.pending)?;
            let block: Vec<u8> = self.pending.drain(..consumed).take(end).collect();
            let text = decode_block(&block);

            if !text.trim().is_empty() {
                return Some(text);
            }
        }
    }

    /// Take whatever is left once the byte stream has ended
    pub fn take_remaining(&mut self) -> Option<String> {
        let rest = decode_block(&std::mem::take(&mut self.pending));
        (!rest.trim().is_empty()).then_some(rest)
    }
}

/// Locate the first blank line: `(block end, bytes consumed)`
///
/// Accepts `\n\n`, `\r\n\r\n` and mixed forms. A `\r` right before the
/// separator is part of the line ending.
fn find_separator(buf: &[u8]) -> Option<(usize, usize)> {
    buf.iter().enumerate().find_map(|(i, byte)| {
        if *byte != b'\n' {
            return None;
        }
        let rest = &buf[i + 1..];
        let consumed = if rest.starts_with(b"\n") {
            i + 2
        } else if rest.starts_with(b"\r\n") {
            i + 3
        } else {
            return None;
        };
        let end = if i > 0 && buf[i - 1] == b'\r' { i - 1 } else { i };
        Some((end, consumed))
    })
}

fn decode_block(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.contains('\r') {
        text.replace("\r\n", "\n")
    } else {
        text.into_owned()
    }
}

/// Payload carried by one SSE block
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent<'a> {
    Data(Cow<'a, str>),
    Done,
    /// Comments, keep-alives and blocks without data
    Ignored,
}

/// Join the `data:` lines of a block
pub fn parse_block(block: &str) -> SseEvent<'_> {
    let data_lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();

    let data = match data_lines.as_slice() {
        [] => return SseEvent::Ignored,
        [single] => Cow::Borrowed(*single),
        many => Cow::Owned(many.join("\n")),
    };

    if data.trim() == DONE_MARKER {
        SseEvent::Done
    } else {
        SseEvent::Data(data)
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Content of the first choice's delta, empty when absent
///
/// Azure sends chunks without choices (content filter results) and chunks
/// with only a role or a finish reason; all of them carry no content.
pub fn chunk_content(data: &str) -> Result<String, serde_json::Error> {
    let chunk: StreamChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_split_across_chunks() {
        let mut buffer = SseBuffer::new();
        buffer.push_chunk(b"data: {\"a\"");
        assert_eq!(buffer.next_block(), None);

        buffer.push_chunk(b":1}\n\ndata: [DONE]\n\n");
        assert_eq!(buffer.next_block().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(buffer.next_block().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.next_block(), None);
    }

    #[test]
    fn test_crlf_is_normalized() {
        let mut buffer = SseBuffer::new();
        buffer.push_chunk(b"data: x\r\n\r\n");
        assert_eq!(buffer.next_block().as_deref(), Some("data: x"));
    }

    #[test]
    fn test_crlf_separator_split_across_chunks() {
        let mut buffer = SseBuffer::new();
        buffer.push_chunk(b"data: a\r\n\r");
        assert_eq!(buffer.next_block(), None);

        buffer.push_chunk(b"\ndata: b\r\ndata: c\r\n\r\n");
        assert_eq!(buffer.next_block().as_deref(), Some("data: a"));
        assert_eq!(buffer.next_block().as_deref(), Some("data: b\ndata: c"));
        assert_eq!(buffer.next_block(), None);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "data: caf\u{e9} \u{1F600}\n\n".as_bytes();
        let mut buffer = SseBuffer::new();
        for byte in text {
            buffer.push_chunk(std::slice::from_ref(byte));
        }
        assert_eq!(buffer.next_block().as_deref(), Some("data: caf\u{e9} \u{1F600}"));
    }

    #[test]
    fn test_take_remaining_ignores_whitespace() {
        let mut buffer = SseBuffer::new();
        buffer.push_chunk(b"\n");
        assert_eq!(buffer.take_remaining(), None);

        buffer.push_chunk(b"data: tail");
        assert_eq!(buffer.take_remaining().as_deref(), Some("data: tail"));
    }

    #[test]
    fn test_parse_block_variants() {
        assert_eq!(parse_block("data: [DONE]"), SseEvent::Done);
        assert_eq!(parse_block(": keep-alive"), SseEvent::Ignored);
        assert_eq!(
            parse_block("event: message\ndata: {}"),
            SseEvent::Data(Cow::Borrowed("{}"))
        );
        assert_eq!(
            parse_block("data: a\ndata: b"),
            SseEvent::Data(Cow::Owned("a\nb".to_string()))
        );
    }

    #[test]
    fn test_chunk_content_extraction() {
        let content = chunk_content(r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#);
        assert_eq!(content.unwrap(), "Hel");

        let role_only = chunk_content(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#);
        assert_eq!(role_only.unwrap(), "");

        let filter_preamble = chunk_content(r#"{"choices":[],"prompt_filter_results":[]}"#);
        assert_eq!(filter_preamble.unwrap(), "");

        let null_content = chunk_content(r#"{"choices":[{"delta":{"content":null}}]}"#);
        assert_eq!(null_content.unwrap(), "");

        assert!(chunk_content("not json").is_err());
    }
}

//! Server-sent events framing.
//!
//! HTTP providers stream `event:` and `data:` lines separated by blank
//! lines.  [`SseDecoder`] turns raw body chunks into [`SseFrame`]s, buffering
//! partial lines (and partial UTF-8 sequences) across chunk boundaries.
//! Interpreting the `data` payload is left to each provider's translator.

use crate::error::{AgentError, Result};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field, if the frame carried one.
    pub event: Option<String>,
    /// All `data:` lines of the frame, joined with `\n`.
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// `true` for the OpenAI-style `[DONE]` sentinel.
    pub fn is_done_sentinel(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes received but not yet terminated by a newline.
    pending: Vec<u8>,
    /// The most recently seen `event:` type in the current frame.
    event: Option<String>,
    /// `data:` lines of the current frame.
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = std::str::from_utf8(&raw).map_err(|e| AgentError::LlmStreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;
            if let Some(frame) = self.parse_line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }

        Ok(frames)
    }

    /// Flush a trailing frame when the body ends without a blank line.
    pub fn finish(&mut self) -> Result<Option<SseFrame>> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8(raw).map_err(|e| AgentError::LlmStreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;
            if let Some(frame) = self.parse_line(line.trim_end_matches('\r')) {
                return Ok(Some(frame));
            }
        }
        Ok(self.dispatch())
    }

    fn parse_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keepalive.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => tracing::trace!(line, "ignoring unrecognised SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .push(b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n")
            .unwrap();
        assert_eq!(
            frames,
            vec![SseFrame::named("message_start", r#"{"type":"message_start"}"#)]
        );
    }

    #[test]
    fn buffers_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").unwrap().is_empty());
        assert!(decoder.push(b"1}\n").unwrap().is_empty());
        let frames = decoder.push(b"\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data(r#"{"a":1}"#)]);
    }

    #[test]
    fn buffers_multibyte_characters_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let text = "data: é\n\n".as_bytes();
        // Split inside the two-byte `é`.
        assert!(decoder.push(&text[..7]).unwrap().is_empty());
        let frames = decoder.push(&text[7..]).unwrap();
        assert_eq!(frames, vec![SseFrame::data("é")]);
    }

    #[test]
    fn joins_multiple_data_lines_and_handles_crlf() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: a\r\ndata: b\r\n\r\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("a\nb")]);
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b": keepalive\n\n\n").unwrap().is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").unwrap().is_empty());
        let frame = decoder.finish().unwrap().unwrap();
        assert!(frame.is_done_sentinel());
        assert!(decoder.finish().unwrap().is_none());
    }
}

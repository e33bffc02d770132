//! Server-Sent-Events framing for the chat stream.
//!
//! The relay forwards upstream bytes verbatim and never needs to parse
//! events. It only tracks frame boundaries so that a frame the relay itself
//! appends is never glued onto a partially forwarded one.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One decoded `data: {json}` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Content {
        content: String,
    },
    Done {
        full_response: String,
        #[serde(default)]
        sources: Vec<String>,
    },
    Error {
        content: String,
    },
}

impl StreamEvent {
    /// Encode as a complete `data: ...\n\n` frame.
    pub fn to_frame(&self) -> Bytes {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Bytes::from(format!("data: {json}\n\n"))
    }

    /// Decode a single frame's text. Non-data lines are ignored.
    pub fn from_frame(frame: &str) -> Option<Self> {
        frame
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .and_then(|data| serde_json::from_str(data.trim()).ok())
    }
}

/// Counts frames across arbitrary chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct FrameTracker {
    frames: u64,
    bytes: u64,
    /// Trailing newlines seen since the last non-newline byte.
    trailing_newlines: u8,
    /// Whether any byte of the current frame has been seen.
    in_frame: bool,
}

impl FrameTracker {
    pub fn observe(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len() as u64;
        for &b in chunk {
            if b == b'\n' {
                if self.in_frame {
                    self.trailing_newlines = self.trailing_newlines.saturating_add(1);
                    if self.trailing_newlines == 2 {
                        self.frames += 1;
                        self.in_frame = false;
                        self.trailing_newlines = 0;
                    }
                }
            } else if b != b'\r' {
                self.in_frame = true;
                self.trailing_newlines = 0;
            }
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Bytes that terminate a partially forwarded frame, if one is open.
    pub fn closing_bytes(&self) -> &'static [u8] {
        match (self.in_frame, self.trailing_newlines) {
            (false, _) => b"",
            (true, 1) => b"\n",
            (true, _) => b"\n\n",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_upstream_frames() {
        let content = StreamEvent::from_frame(r#"data: {"type":"content","content":"Hel"}"#);
        assert_eq!(
            content,
            Some(StreamEvent::Content {
                content: "Hel".to_string()
            })
        );

        let done = StreamEvent::from_frame(
            r#"data: {"type":"done","full_response":"Hello","sources":["faq.md"]}"#,
        );
        assert_eq!(
            done,
            Some(StreamEvent::Done {
                full_response: "Hello".to_string(),
                sources: vec!["faq.md".to_string()],
            })
        );
    }

    #[test]
    fn test_error_frame_encoding() {
        let frame = StreamEvent::Error {
            content: "sorry".to_string(),
        }
        .to_frame();
        assert_eq!(
            &frame[..],
            b"data: {\"type\":\"error\",\"content\":\"sorry\"}\n\n"
        );
    }

    #[test]
    fn test_frames_counted_across_chunk_splits() {
        let mut tracker = FrameTracker::default();
        tracker.observe(b"data: {\"a\":1}\n");
        assert_eq!(tracker.frames(), 0);
        tracker.observe(b"\ndata: {\"b\"");
        assert_eq!(tracker.frames(), 1);
        tracker.observe(b":2}\n\n");
        assert_eq!(tracker.frames(), 2);
        assert_eq!(tracker.closing_bytes(), b"");
    }

    #[test]
    fn test_closing_bytes_for_open_frame() {
        let mut tracker = FrameTracker::default();
        tracker.observe(b"data: {\"partial\"");
        assert_eq!(tracker.closing_bytes(), b"\n\n");
        tracker.observe(b"}\n");
        assert_eq!(tracker.closing_bytes(), b"\n");
    }
}

//! Incremental splitter for back-to-back JSON texts.

use bytes::{Bytes, BytesMut};

/// States of the framing machine.
///
/// `Start`/`Text` handle bytes outside and inside a top-level value;
/// `Str`/`Escape` handle string literals so brackets inside them are not
/// counted. The two comment sub-machines are copies of each other: one
/// entered from `Start` (a comment before a top-level value) and one from
/// `Text` (a comment inside it), each returning to the state it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Text,
    Str,
    Escape,
    SlashBefore,
    LineBefore,
    BlockBefore,
    BlockBeforeStar,
    SlashInside,
    LineInside,
    BlockInside,
    BlockInsideStar,
}

/// Incremental framer for continuous streams of JSON objects and arrays,
/// optionally stripping JavaScript-style comments.
///
/// Feed arbitrary byte chunks with [`push`](JsonFramer::push); each
/// completed top-level text comes back as one [`Bytes`] frame. Frame
/// boundaries depend only on the byte sequence, never on chunking, so the
/// concatenation of pushed chunks fully determines the output.
///
/// A frame is emitted both when a top-level object or array closes and when
/// an invalid bracket sequence is detected; in the latter case the frame is
/// not valid JSON and the caller's parse will fail. The caller must be
/// prepared for that.
///
/// When comment stripping is enabled, each non-whitespace comment byte is
/// replaced by a space (tabs and newlines pass through) so that line and
/// column numbers in downstream parse errors still point at the right
/// place.
pub struct JsonFramer {
    buffer: BytesMut,
    stack: Vec<u8>,
    state: State,
    strip_comments: bool,
}

impl JsonFramer {
    pub fn new() -> Self {
        Self::with_comment_stripping(false)
    }

    pub fn with_comment_stripping(strip_comments: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            stack: Vec::new(),
            state: State::Start,
            strip_comments,
        }
    }

    /// Consume a chunk of bytes, returning every frame completed by it.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for &byte in data {
            if let Some(frame) = self.consume(byte) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Signal end of input, flushing any buffered partial text as a final
    /// frame. Whitespace-only residue is discarded, not flushed.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.take_frame()
    }

    fn consume(&mut self, byte: u8) -> Option<Bytes> {
        match self.state {
            State::Start => match byte {
                b'{' | b'[' => {
                    self.buffer.extend_from_slice(&[byte]);
                    self.stack.push(byte);
                    self.state = State::Text;
                    None
                }
                b'/' if self.strip_comments => {
                    self.state = State::SlashBefore;
                    None
                }
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.buffer.extend_from_slice(&[byte]);
                    None
                }
                // Anything else before a top-level value is invalid; flush
                // it so the caller can report a parse error.
                _ => {
                    self.buffer.extend_from_slice(&[byte]);
                    self.take_frame()
                }
            },
            State::Text => match byte {
                b'"' => {
                    self.buffer.extend_from_slice(&[byte]);
                    self.state = State::Str;
                    None
                }
                b'{' | b'[' => {
                    self.buffer.extend_from_slice(&[byte]);
                    self.stack.push(byte);
                    None
                }
                b'}' | b']' => {
                    self.buffer.extend_from_slice(&[byte]);
                    let flush = match self.stack.pop() {
                        // A closer with nothing open: invalid, flush.
                        None => true,
                        Some(opener) => {
                            let matched = (opener == b'{' && byte == b'}')
                                || (opener == b'[' && byte == b']');
                            // Mismatched pair flushes invalid text; a
                            // matched pair flushes only at top level.
                            !matched || self.stack.is_empty()
                        }
                    };
                    if flush {
                        self.take_frame()
                    } else {
                        None
                    }
                }
                b'/' if self.strip_comments => {
                    self.state = State::SlashInside;
                    None
                }
                _ => {
                    self.buffer.extend_from_slice(&[byte]);
                    None
                }
            },
            State::Str => {
                self.buffer.extend_from_slice(&[byte]);
                match byte {
                    b'"' => self.state = State::Text,
                    b'\\' => self.state = State::Escape,
                    _ => {}
                }
                None
            }
            State::Escape => {
                self.buffer.extend_from_slice(&[byte]);
                self.state = State::Str;
                None
            }
            State::SlashBefore => self.consume_slash(byte, State::BlockBefore, State::LineBefore),
            State::SlashInside => self.consume_slash(byte, State::BlockInside, State::LineInside),
            State::LineBefore => {
                self.consume_line_comment(byte, State::Start);
                None
            }
            State::LineInside => {
                self.consume_line_comment(byte, State::Text);
                None
            }
            State::BlockBefore => {
                self.buffer.extend_from_slice(b" ");
                if byte == b'*' {
                    self.state = State::BlockBeforeStar;
                }
                None
            }
            State::BlockInside => {
                self.buffer.extend_from_slice(b" ");
                if byte == b'*' {
                    self.state = State::BlockInsideStar;
                }
                None
            }
            State::BlockBeforeStar => {
                self.buffer.extend_from_slice(b" ");
                self.state = if byte == b'/' {
                    State::Start
                } else {
                    State::BlockBefore
                };
                None
            }
            State::BlockInsideStar => {
                self.buffer.extend_from_slice(b" ");
                self.state = if byte == b'/' {
                    State::Text
                } else {
                    State::BlockInside
                };
                None
            }
        }
    }

    /// One byte past a lone `/`: open a comment, or flush the invalid `/`.
    fn consume_slash(&mut self, byte: u8, block: State, line: State) -> Option<Bytes> {
        match byte {
            b'*' => {
                self.buffer.extend_from_slice(b"  ");
                self.state = block;
                None
            }
            b'/' => {
                self.buffer.extend_from_slice(b"  ");
                self.state = line;
                None
            }
            _ => {
                self.buffer.extend_from_slice(b"/");
                self.buffer.extend_from_slice(&[byte]);
                self.take_frame()
            }
        }
    }

    fn consume_line_comment(&mut self, byte: u8, resume: State) {
        match byte {
            b'\n' | b'\r' => {
                self.buffer.extend_from_slice(&[byte]);
                self.state = resume;
            }
            b'\t' => self.buffer.extend_from_slice(b"\t"),
            _ => self.buffer.extend_from_slice(b" "),
        }
    }

    /// Reset to the initial state and hand back the buffered text, unless
    /// it is whitespace only (trailing whitespace between texts is normal
    /// and must not produce an empty frame).
    fn take_frame(&mut self) -> Option<Bytes> {
        let data = self.buffer.split().freeze();
        self.stack.clear();
        self.state = State::Start;
        if data
            .iter()
            .all(|&b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        {
            None
        } else {
            Some(data)
        }
    }
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` in chunks of `step` bytes and collect all frames as
    /// strings, including the end-of-input flush.
    fn frames_stepped(framer: &mut JsonFramer, input: &[u8], step: usize) -> Vec<String> {
        let mut out = Vec::new();
        for chunk in input.chunks(step) {
            for frame in framer.push(chunk) {
                out.push(String::from_utf8(frame.to_vec()).unwrap());
            }
        }
        if let Some(frame) = framer.finish() {
            out.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn test_single_object() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"{\"method\":\"hello\"}");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"{\"method\":\"hello\"}" as &[u8]);
    }

    #[test]
    fn test_back_to_back_texts() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"{\"a\":1}[2,3]{\"b\":{}}");
        let texts: Vec<_> = frames.iter().map(|f| &f[..]).collect();
        assert_eq!(
            texts,
            vec![
                b"{\"a\":1}" as &[u8],
                b"[2,3]" as &[u8],
                b"{\"b\":{}}" as &[u8],
            ]
        );
    }

    #[test]
    fn test_chunking_invariance() {
        let input: &[u8] =
            b" {\"a\": [1, 2, {\"b\": \"}]\"}]} [\"\\\"{[\", {}] {\"c\": null}\n";
        let expected = frames_stepped(&mut JsonFramer::new(), input, input.len());
        assert_eq!(expected.len(), 3);
        for step in 1..input.len() {
            let got = frames_stepped(&mut JsonFramer::new(), input, step);
            assert_eq!(got, expected, "chunk size {step}");
        }
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"{\"s\": \"}{][\"}");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"{\"s\": \"}{][\"}" as &[u8]);
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"{\"s\": \"a\\\"}\"}");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_partial_text_emits_nothing_until_complete() {
        let mut framer = JsonFramer::new();
        assert!(framer.push(b"{\"a\":").is_empty());
        assert!(framer.push(b" 1").is_empty());
        let frames = framer.push(b"}");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"{\"a\": 1}" as &[u8]);
    }

    #[test]
    fn test_mismatched_bracket_flushes_invalid_text() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"{\"a\": [1}");
        // The invalid text is flushed for the caller to fail on.
        assert_eq!(frames.len(), 1);
        assert!(serde_json::from_slice::<serde_json::Value>(&frames[0]).is_err());
    }

    #[test]
    fn test_unopened_closer_flushes_immediately() {
        let mut framer = JsonFramer::new();
        // A stray `]` after a complete text is flushed on its own as a
        // one-byte invalid frame.
        let frames = framer.push(b"[1]]");
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[1][..], b"]" as &[u8]);
        assert!(serde_json::from_slice::<serde_json::Value>(&frames[1]).is_err());
    }

    #[test]
    fn test_interstitial_whitespace_not_flushed() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"  {\"a\":1}  \n\t {\"b\":2} \r\n");
        assert_eq!(frames.len(), 2);
        // Trailing whitespace alone never becomes a frame.
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_garbage_before_text_flushed_bytewise() {
        let mut framer = JsonFramer::new();
        let frames = framer.push(b"x{\"a\":1}");
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"x" as &[u8]);
        assert_eq!(&frames[1][..], b"{\"a\":1}" as &[u8]);
    }

    #[test]
    fn test_finish_flushes_partial_text() {
        let mut framer = JsonFramer::new();
        assert!(framer.push(b"{\"a\": ").is_empty());
        let frame = framer.finish().unwrap();
        assert_eq!(&frame[..], b"{\"a\": " as &[u8]);
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_line_comments_stripped_to_spaces() {
        let mut framer = JsonFramer::with_comment_stripping(true);
        let frames = framer.push(b"// leading\n{\"a\": 1 // trailing\n}");
        assert_eq!(frames.len(), 1);
        let text = std::str::from_utf8(&frames[0]).unwrap();
        // Comment bytes became spaces, the newline survived, and the text
        // still parses.
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_block_comments_stripped_to_spaces() {
        let mut framer = JsonFramer::with_comment_stripping(true);
        let frames = framer.push(b"/* x */ {\"a\": /* y */ 1}");
        assert_eq!(frames.len(), 1);
        let text = std::str::from_utf8(&frames[0]).unwrap();
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
        // Length is preserved so error columns stay meaningful.
        assert_eq!(text.len(), "/* x */ {\"a\": /* y */ 1}".len());
    }

    #[test]
    fn test_slash_without_comment_is_invalid() {
        let mut framer = JsonFramer::with_comment_stripping(true);
        let frames = framer.push(b"{\"a\": 1 /x");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"{\"a\": 1 /x" as &[u8]);
    }

    #[test]
    fn test_comments_not_stripped_by_default() {
        let mut framer = JsonFramer::new();
        // Without stripping, a `/` inside a text is just a byte.
        let frames = framer.push(b"{\"url\": \"a/b\"}");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"{\"url\": \"a/b\"}" as &[u8]);
    }

    #[test]
    fn test_deep_nesting() {
        let mut framer = JsonFramer::new();
        let mut input = Vec::new();
        for _ in 0..64 {
            input.push(b'[');
        }
        for _ in 0..64 {
            input.push(b']');
        }
        let frames = framer.push(&input);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 128);
    }
}

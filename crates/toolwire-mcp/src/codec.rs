//! JSON message framing over a byte stream.
//!
//! Outbound messages are written as one compact JSON document followed by
//! `\n`. Inbound, [`JsonFrameCodec`] decodes the first complete JSON value at
//! the head of the buffer and leaves whatever follows for the next frame, so
//! it accepts newline-delimited output, several documents in one read, a
//! document split across reads, and pretty-printed documents alike.

use crate::error::{McpError, McpResult};
use bytes::BytesMut;
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Upper bound on a single buffered frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Result of scanning the head of the buffer.
enum Scan {
    /// A complete value and the number of bytes it occupied.
    Complete(Value, usize),
    /// The value is not finished yet.
    Incomplete,
    /// The head of the buffer is not JSON.
    Garbage(String),
}

fn scan(buf: &[u8]) -> Scan {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Scan::Complete(value, stream.byte_offset()),
        Some(Err(e)) if e.is_eof() => Scan::Incomplete,
        Some(Err(e)) => Scan::Garbage(e.to_string()),
        None => Scan::Incomplete,
    }
}

/// Tracks nesting of an object at the head of the buffer across reads, so
/// each byte is looked at once no matter how many reads a frame spans.
#[derive(Debug, Clone, Copy, Default)]
struct ObjectScan {
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Whether the first line was already checked for non-JSON text.
    line_checked: bool,
}

impl ObjectScan {
    /// Advance over the unseen bytes. Returns the length of the object once
    /// its closing brace has been seen.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while self.offset < buf.len() {
            let byte = buf[self.offset];
            self.offset += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Codec turning a boundary-less byte stream into JSON objects.
#[derive(Debug, Clone)]
pub struct JsonFrameCodec {
    max_frame_len: usize,
    object: ObjectScan,
}

impl JsonFrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            object: ObjectScan::default(),
        }
    }

    fn check_len(&self, src: &BytesMut) -> McpResult<()> {
        if src.len() > self.max_frame_len {
            return Err(McpError::protocol_error(format!(
                "frame exceeds {} bytes",
                self.max_frame_len
            )));
        }
        Ok(())
    }

    /// Drop everything through the next newline. `false` if there is no
    /// newline yet.
    fn skip_line(&mut self, src: &mut BytesMut, reason: &str) -> McpResult<bool> {
        self.object = ObjectScan::default();
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            self.check_len(src)?;
            return Ok(false);
        };
        let skipped = src.split_to(newline + 1);
        warn!(
            line = %String::from_utf8_lossy(&skipped).trim_end(),
            reason = %reason,
            "Skipping non-JSON output"
        );
        Ok(true)
    }

    /// Decode an object at the head of `src`.
    fn decode_object(&mut self, src: &mut BytesMut) -> McpResult<Option<Option<Value>>> {
        let seen = self.object.offset;
        let Some(end) = self.object.advance(src) else {
            // Text like `{ starting up` never balances; catch it at the
            // first newline instead of waiting for the size limit.
            if !self.object.line_checked && src[seen..].contains(&b'\n') {
                self.object.line_checked = true;
                if let Scan::Garbage(reason) = scan(src) {
                    return Ok(self.skip_line(src, &reason)?.then_some(None));
                }
            }
            self.check_len(src)?;
            return Ok(None);
        };

        self.object = ObjectScan::default();
        match serde_json::from_slice::<Value>(&src[..end]) {
            Ok(value) => {
                let _ = src.split_to(end);
                Ok(Some(Some(value)))
            }
            Err(e) => Ok(self.skip_line(src, &e.to_string())?.then_some(None)),
        }
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonFrameCodec {
    type Item = Value;
    type Error = McpError;

    fn decode(&mut self, src: &mut BytesMut) -> McpResult<Option<Value>> {
        loop {
            let Some(start) = src.iter().position(|b| !b.is_ascii_whitespace()) else {
                self.object = ObjectScan::default();
                src.clear();
                return Ok(None);
            };
            if start > 0 {
                self.object = ObjectScan::default();
                let _ = src.split_to(start);
            }

            if src[0] == b'{' {
                // Outer `None`: wait for more bytes. Inner `None`: a line
                // was skipped, look again.
                match self.decode_object(src)? {
                    Some(Some(value)) => return Ok(Some(value)),
                    Some(None) => continue,
                    None => return Ok(None),
                }
            }

            match scan(&src[..]) {
                Scan::Complete(value, consumed) => {
                    let _ = src.split_to(consumed);
                    warn!(frame = %value, "Dropping non-object frame");
                }
                Scan::Incomplete => {
                    self.check_len(src)?;
                    return Ok(None);
                }
                Scan::Garbage(reason) => {
                    if !self.skip_line(src, &reason)? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> McpResult<Option<Value>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(
                remaining = src.len(),
                "Stream ended with an unfinished frame"
            );
            src.clear();
        }
        self.object = ObjectScan::default();
        Ok(None)
    }
}

impl<T: Serialize> Encoder<T> for JsonFrameCodec {
    type Error = McpError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> McpResult<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcRequest;
    use serde_json::json;

    fn decode_all(codec: &mut JsonFrameCodec, buf: &mut BytesMut) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_newline_delimited() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1,\"result\":{}}\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec![json!({"id": 1, "result": {}})]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_messages_in_one_read() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1,\"result\":1}{\"id\":2,\"result\":2}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["id"], 1);
        assert_eq!(frames[1]["id"], 2);
    }

    #[test]
    fn test_split_across_reads() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":7,\"res"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 12);

        buf.extend_from_slice(b"ult\":[1,2]}\n{\"id\":");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, json!({"id": 7, "result": [1, 2]}));
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"8,\"result\":null}");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame["id"], 8);
    }

    #[test]
    fn test_pretty_printed() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"{\n  \"id\": 3,\n  \"result\": {\n    \"ok\": true\n  }\n}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![json!({"id": 3, "result": {"ok": true}})]);
    }

    #[test]
    fn test_skips_banner_lines() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"Starting server on stdio...\n{\"id\":1,\"result\":{}}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![json!({"id": 1, "result": {}})]);
    }

    #[test]
    fn test_drops_non_object_values() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"[1,2]\n\"hello\"\n{\"method\":\"x\"}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![json!({"method": "x"})]);
    }

    #[test]
    fn test_whitespace_only() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"\n\r\n   \t"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut codec = JsonFrameCodec::with_max_frame_len(16);
        let mut buf = BytesMut::from(&b"{\"result\":\"aaaaaaaaaaaaaaaaaaaaaaaa"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(McpError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_eof_discards_partial() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_in_many_small_reads() {
        let frame = br#"{"id":4,"result":{"query":"SELECT { ?s } \"}\" {","rows":[{"a":1},{"b":[2]}]}}"#;
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::new();

        let (head, last) = frame.split_at(frame.len() - 1);
        for chunk in head.chunks(7) {
            buf.extend_from_slice(chunk);
            assert!(codec.decode(&mut buf).unwrap().is_none());
            // Earlier bytes are not revisited.
            assert_eq!(codec.object.offset, buf.len());
        }

        buf.extend_from_slice(last);
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value["id"], 4);
        assert_eq!(value["result"]["query"], "SELECT { ?s } \"}\" {");
        assert_eq!(value["result"]["rows"][1]["b"][0], 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_skips_line_starting_with_brace() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"{ starting up\n{oops}\n{\"id\":1,\"result\":{}}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![json!({"id": 1, "result": {}})]);
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                JsonRpcRequest::new(1, "execute_sparql", Some(json!({"query": "SELECT *\nWHERE {}"}))),
                &mut buf,
            )
            .unwrap();

        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame["params"]["query"], "SELECT *\nWHERE {}");
    }
}

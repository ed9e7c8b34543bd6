//! `Content-Length` framing
//!
//! Decoding is incremental: bytes are pushed as they arrive and complete
//! frames are pulled out. Partial input stays in the decoder, so a read that
//! is cancelled between two `push` calls never loses data.

use crate::{Error, ProtocolMessage, Result};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// A header block larger than this without a terminator is garbage
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Bodies above this are skipped and reported as malformed
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Frame a message for the wire
pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
    frame.extend_from_slice(&json);
    Ok(frame)
}

#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_body: usize,
    /// Bytes of an oversized body still to be thrown away
    skip: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_BYTES)
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_body,
            skip: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.skip > 0 {
            let n = self.skip.min(data.len());
            self.skip -= n;
            self.buf.extend_from_slice(&data[n..]);
        } else {
            self.buf.extend_from_slice(data);
        }
    }

    /// Pull the next complete frame.
    ///
    /// `None` means more bytes are needed. `Some(Err(_))` is a malformed
    /// frame that has already been consumed; calling again continues with
    /// whatever follows it.
    pub fn next_frame(&mut self) -> Option<Result<ProtocolMessage>> {
        let Some(header_end) = find(&self.buf, HEADER_TERMINATOR) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                let dropped = self.buf.len();
                self.buf.clear();
                return Some(Err(Error::Protocol(format!(
                    "No header terminator within {} bytes (dropped)",
                    dropped
                ))));
            }
            return None;
        };

        let body_start = header_end + HEADER_TERMINATOR.len();
        let length = match parse_content_length(&self.buf[..header_end]) {
            Ok(length) => length,
            Err(e) => {
                self.buf.drain(..body_start);
                return Some(Err(e));
            }
        };

        if length > self.max_body {
            self.buf.drain(..body_start);
            let available = self.buf.len().min(length);
            self.buf.drain(..available);
            self.skip = length - available;
            return Some(Err(Error::Protocol(format!(
                "Content-Length {} exceeds limit {}",
                length, self.max_body
            ))));
        }

        if self.buf.len() < body_start + length {
            return None;
        }

        let body: Vec<u8> = self.buf.drain(..body_start + length).skip(body_start).collect();
        Some(decode_body(body))
    }

    /// True when some bytes of an incomplete frame are held
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_body(body: Vec<u8>) -> Result<ProtocolMessage> {
    let text = String::from_utf8(body)?;
    tracing::trace!("Received message: {}", text);
    Ok(serde_json::from_str(&text)?)
}

fn parse_content_length(header: &[u8]) -> Result<usize> {
    let header = String::from_utf8_lossy(header);
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let value = value.trim();
            return value
                .parse()
                .map_err(|_| Error::Protocol(format!("Invalid Content-Length: {}", value)));
        }
    }
    Err(Error::Protocol("Missing Content-Length header".to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, Request, Response};
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_messages() -> Vec<ProtocolMessage> {
        vec![
            ProtocolMessage::Request(
                Request::new(1, "initialize").with_arguments(json!({"adapterID": "debugpy"})),
            ),
            ProtocolMessage::Response(
                Response::success(2, 1, "initialize")
                    .with_body(json!({"supportsLogPoints": true, "label": "ünïcødé"})),
            ),
            ProtocolMessage::Event(Event::new(3, "initialized")),
            ProtocolMessage::Event(
                Event::new(4, "output").with_body(json!({"output": "line\r\n\r\nmore"})),
            ),
        ]
    }

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Result<ProtocolMessage>> {
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn test_encode_header() {
        let msg = ProtocolMessage::Event(Event::new(1, "initialized"));
        let frame = encode(&msg).unwrap();
        let text = String::from_utf8(frame).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let frame = encode(&sample_messages()[0]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..frame.len() - 3]);
        assert!(decoder.next_frame().is_none());
        assert!(decoder.has_partial());
        decoder.push(&frame[frame.len() - 3..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), sample_messages()[0]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_extra_headers_and_case_ignored() {
        let body = r#"{"seq":1,"type":"event","event":"initialized"}"#;
        let raw = format!(
            "content-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut decoder = FrameDecoder::new();
        decoder.push(raw.as_bytes());
        let msg = decoder.next_frame().unwrap().unwrap();
        assert_eq!(msg.describe(), "event:initialized");
    }

    #[test]
    fn test_missing_length_skipped_then_recovers() {
        let good = encode(&sample_messages()[2]).unwrap();
        let mut raw = b"X-Junk: 1\r\n\r\n".to_vec();
        raw.extend_from_slice(&good);

        let mut decoder = FrameDecoder::new();
        decoder.push(&raw);
        let results = decode_all(&mut decoder);
        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap_err().is_malformed_frame());
        assert_eq!(results[1].as_ref().unwrap(), &sample_messages()[2]);
    }

    #[test]
    fn test_invalid_json_and_unknown_type_skipped() {
        let mut raw = Vec::new();
        for body in [r#"{not json"#, r#"{"seq":1,"type":"mystery"}"#] {
            raw.extend_from_slice(format!("Content-Length: {}\r\n\r\n{}", body.len(), body).as_bytes());
        }
        raw.extend_from_slice(&encode(&sample_messages()[2]).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&raw);
        let results = decode_all(&mut decoder);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_err());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_oversized_body_skipped_across_pushes() {
        let mut decoder = FrameDecoder::with_max_body(8);
        decoder.push(b"Content-Length: 20\r\n\r\n0123456789");
        assert!(decoder.next_frame().unwrap().is_err());
        let good = encode(&sample_messages()[2]).unwrap();
        let mut rest = b"0123456789".to_vec();
        rest.extend_from_slice(&good);
        decoder.push(&rest);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), sample_messages()[2]);
    }

    #[test]
    fn test_runaway_header_dropped() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&vec![b'a'; MAX_HEADER_BYTES + 1]);
        assert!(decoder.next_frame().unwrap().is_err());
        assert_eq!(decoder.buffered_len(), 0);
    }

    proptest! {
        #[test]
        fn decode_is_independent_of_chunking(cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12)) {
            let messages = sample_messages();
            let mut stream = Vec::new();
            for m in &messages {
                stream.extend_from_slice(&encode(m).unwrap());
            }

            let mut positions: Vec<usize> = cuts.iter().map(|i| i.index(stream.len())).collect();
            positions.sort_unstable();
            positions.dedup();

            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            let mut start = 0;
            for pos in positions.into_iter().chain(std::iter::once(stream.len())) {
                decoder.push(&stream[start..pos]);
                start = pos;
                while let Some(frame) = decoder.next_frame() {
                    decoded.push(frame.unwrap());
                }
            }

            prop_assert_eq!(decoded, messages);
            prop_assert!(!decoder.has_partial());
        }
    }
}

//! Frame codec for the push channel.
//!
//! Each frame is a 4-byte little-endian `u32` length followed by exactly that
//! many bytes of UTF-8 JSON. Frames are packed back-to-back with no padding.
//! The byte order is a fixed contract between the two endpoints, never
//! negotiated.
//!
//! [`FrameDecoder`] turns an arbitrarily chunked byte stream back into whole
//! messages: the transport may split the length header, split a body across
//! any number of chunks, or deliver several frames at once.

use bytes::BytesMut;

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{Result, RpcError};

use super::Message;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode one message as a length-prefixed frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let length = frame_length(body.len())?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Validate that a body length fits the wire's `u32` prefix.
fn frame_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        RpcError::Protocol(format!("frame body of {} bytes exceeds the u32 length prefix", len))
    })
}

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Length known, waiting for the body bytes.
    WaitingForBody { length: usize },
}

/// Buffer that accumulates chunks and extracts complete messages.
///
/// A completed frame whose body is not valid JSON (or not a known message
/// kind) is logged and dropped; the cursor still advances to the next frame.
/// Only an oversize length header is fatal to the channel.
pub struct FrameDecoder {
    /// Accumulated bytes from channel reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame body size.
    max_frame_size: u32,
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push a chunk into the decoder and extract all complete messages.
    ///
    /// Returns the messages completed by this chunk, in stream order. Partial
    /// data is buffered for the next push.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            match serde_json::from_slice::<Message>(&body) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    // Drop the single bad frame, keep the channel alive.
                    tracing::warn!("dropping malformed frame: {}", e);
                }
            }
        }

        Ok(messages)
    }

    /// Try to extract a single frame body from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<BytesMut>> {
        match self.state {
            State::WaitingForLength => {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }

                let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
                let length = u32::from_le_bytes(prefix);

                if length > self.max_frame_size {
                    return Err(RpcError::Protocol(format!(
                        "frame size {} exceeds maximum {}",
                        length, self.max_frame_size
                    )));
                }

                let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                self.state = State::WaitingForBody {
                    length: length as usize,
                };
                self.try_extract_one()
            }

            State::WaitingForBody { length } => {
                if self.buffer.len() < length {
                    return Ok(None);
                }

                let body = self.buffer.split_to(length);
                self.state = State::WaitingForLength;
                Ok(Some(body))
            }
        }
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer and reset the state machine.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(call_id: u64) -> Message {
        Message::MethodResult {
            call_id,
            value: json!({"n": call_id}),
        }
    }

    #[test]
    fn test_length_prefix_is_little_endian() {
        let bytes = encode_frame(&Message::Heartbeat { client_id: None }).unwrap();
        let body_len = bytes.len() - LENGTH_PREFIX_SIZE;
        assert_eq!(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            body_len as u32
        );
        assert_eq!(&bytes[LENGTH_PREFIX_SIZE..], br#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = FrameDecoder::new();
        let bytes = encode_frame(&sample(1)).unwrap();

        let messages = decoder.push(&bytes).unwrap();
        assert_eq!(messages, vec![sample(1)]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let mut combined = Vec::new();
        for i in 1..=3 {
            combined.extend(encode_frame(&sample(i)).unwrap());
        }

        let messages = decoder.push(&combined).unwrap();
        assert_eq!(messages, vec![sample(1), sample(2), sample(3)]);
    }

    #[test]
    fn test_length_prefix_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        let bytes = encode_frame(&sample(9)).unwrap();

        assert!(decoder.push(&bytes[..2]).unwrap().is_empty());
        let messages = decoder.push(&bytes[2..]).unwrap();
        assert_eq!(messages, vec![sample(9)]);
    }

    #[test]
    fn test_body_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        let bytes = encode_frame(&sample(5)).unwrap();
        let mid = LENGTH_PREFIX_SIZE + 7;

        assert!(decoder.push(&bytes[..mid]).unwrap().is_empty());
        assert!(decoder.push(&bytes[mid..mid + 3]).unwrap().is_empty());
        let messages = decoder.push(&bytes[mid + 3..]).unwrap();
        assert_eq!(messages, vec![sample(5)]);
    }

    #[test]
    fn test_tail_of_one_frame_plus_head_of_next() {
        let mut decoder = FrameDecoder::new();
        let first = encode_frame(&sample(1)).unwrap();
        let second = encode_frame(&sample(2)).unwrap();

        let chunk_a = first[..first.len() - 3].to_vec();
        let mut chunk_b = first[first.len() - 3..].to_vec();
        chunk_b.extend_from_slice(&second[..5]);
        let chunk_c = second[5..].to_vec();

        assert!(decoder.push(&chunk_a).unwrap().is_empty());
        assert_eq!(decoder.push(&chunk_b).unwrap(), vec![sample(1)]);
        assert_eq!(decoder.push(&chunk_c).unwrap(), vec![sample(2)]);
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = Vec::new();
        for i in 1..=4 {
            bytes.extend(encode_frame(&sample(i)).unwrap());
        }

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(decoder.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(all, vec![sample(1), sample(2), sample(3), sample(4)]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_malformed_json_frame_is_dropped_and_cursor_advances() {
        let mut decoder = FrameDecoder::new();

        let bad_body = b"{not json";
        let mut bytes = (bad_body.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(bad_body);
        bytes.extend(encode_frame(&sample(8)).unwrap());

        let messages = decoder.push(&bytes).unwrap();
        assert_eq!(messages, vec![sample(8)]);
    }

    #[test]
    fn test_valid_json_of_unknown_kind_is_dropped() {
        let mut decoder = FrameDecoder::new();

        let body = br#"{"type":"bogus"}"#;
        let mut bytes = (body.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes.extend(encode_frame(&sample(3)).unwrap());

        let messages = decoder.push(&bytes).unwrap();
        assert_eq!(messages, vec![sample(3)]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_body_too_long_for_length_prefix_is_rejected() {
        assert!(frame_length(u32::MAX as usize).is_ok());
        let result = frame_length(u32::MAX as usize + 1);
        assert!(matches!(result, Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_oversize_frame_is_fatal() {
        let mut decoder = FrameDecoder::with_max_frame_size(64);
        let bytes = 1000u32.to_le_bytes();

        let result = decoder.push(&bytes);
        assert!(matches!(result, Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut decoder = FrameDecoder::new();
        let bytes = encode_frame(&sample(1)).unwrap();

        decoder.push(&bytes[..bytes.len() - 1]).unwrap();
        assert!(decoder.buffered() > 0);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);

        // A fresh frame decodes cleanly after the reset.
        assert_eq!(decoder.push(&bytes).unwrap(), vec![sample(1)]);
    }
}

//! Length-prefixed codec for Cast v2 framing
//!
//! All messages on the device control socket are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf CastMessage ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::cast::CastMessage;

/// Maximum frame payload accepted by Cast receivers (64 KiB)
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode a CastMessage into a length-prefixed byte buffer
pub fn encode(message: &CastMessage) -> Result<Bytes, CodecError> {
    let msg_len = message.encoded_len();

    if msg_len > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(msg_len));
    }

    let mut buf = BytesMut::with_capacity(4 + msg_len);
    buf.put_u32(msg_len as u32);
    message.encode(&mut buf)?;

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed CastMessage from a buffer
///
/// Returns:
/// - `Ok(Some(message))` if a complete message was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<CastMessage>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let msg_bytes = buf.split_to(msg_len as usize);
    let message = CastMessage::decode(msg_bytes)?;

    Ok(Some(message))
}

/// Decoder state for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<CastMessage>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::{NS_RECEIVER, RECEIVER_ID, SENDER_ID};
    use serde_json::json;

    fn status_request() -> CastMessage {
        CastMessage::json(
            SENDER_ID,
            RECEIVER_ID,
            NS_RECEIVER,
            &json!({"type": "GET_STATUS", "requestId": 1}),
        )
    }

    #[test]
    fn test_length_prefix() {
        let encoded = encode(&status_request()).expect("encode failed");
        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&status_request()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_chunks() {
        let original = status_request();
        let encoded = encode(&original).expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..7]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&encoded[7..]);
        let decoded = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have message");

        assert_eq!(decoded, original);
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(&status_request()).unwrap());
        decoder.extend(&encode(&status_request()).unwrap());

        assert!(decoder.decode_next().expect("decode error").is_some());
        assert!(decoder.decode_next().expect("decode error").is_some());
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_MESSAGE_SIZE + 1);
        buf.put_bytes(0, 16);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));
    }
}

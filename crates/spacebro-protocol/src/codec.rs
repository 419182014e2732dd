//! Codec for encoding and decoding spacebro frames.
//!
//! Two encodings are supported:
//!
//! - **JSON** (default): a text message holding `["event", payload]`, the
//!   shape socket.io-style brokers speak.
//! - **MessagePack**: a binary message holding a 4-byte big-endian length
//!   prefix followed by the MessagePack encoding of `["event", payload]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::frames::Frame;
use crate::payload::Payload;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Wire encoding of frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    #[serde(alias = "msgpack")]
    MessagePack,
}

/// An encoded frame, ready for a message-oriented transport.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

/// Encode a frame with the given encoding.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &Frame, encoding: Encoding) -> Result<WireMessage, ProtocolError> {
    match encoding {
        Encoding::Json => encode_json(frame).map(WireMessage::Text),
        Encoding::MessagePack => encode_msgpack(frame).map(WireMessage::Binary),
    }
}

/// Decode a frame from a wire message.
///
/// Text messages are read as JSON and binary messages as MessagePack,
/// whatever encoding the local side sends with.
///
/// # Errors
///
/// Returns an error if the message is not a valid frame.
pub fn decode(message: &WireMessage) -> Result<Frame, ProtocolError> {
    match message {
        WireMessage::Text(text) => decode_json(text),
        WireMessage::Binary(data) => decode_msgpack(data),
    }
}

/// Encode a frame as a JSON array `["event", payload]`.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(&(&frame.event, &frame.payload))?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a JSON array frame.
///
/// A missing payload (`["event"]`) decodes as `null`.
///
/// # Errors
///
/// Returns an error if the text is not an array starting with an event name.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    let parts: Vec<Value> = serde_json::from_str(text)?;
    frame_from_parts(parts)
}

/// Encode a frame as length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_msgpack(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer as length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(&(&frame.event, &frame.payload))?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode one length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_msgpack(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let parts: Vec<Value> = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    frame_from_parts(parts)
}

/// Try to decode a MessagePack frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);
    let parts: Vec<Value> = rmp_serde::from_slice(&body)?;

    frame_from_parts(parts).map(Some)
}

fn frame_from_parts(parts: Vec<Value>) -> Result<Frame, ProtocolError> {
    let mut parts = parts.into_iter();

    let event = match parts.next() {
        Some(Value::String(event)) => event,
        Some(other) => {
            return Err(ProtocolError::Invalid(format!(
                "event name must be a string, got {other}"
            )))
        }
        None => return Err(ProtocolError::Invalid("empty frame".into())),
    };

    let payload = parts.next().map_or(Payload::Scalar(Value::Null), Payload::from);

    Ok(Frame { event, payload })
}

/// Codec bound to one encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    encoding: Encoding,
}

impl FrameCodec {
    /// Create a codec for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// The encoding used for outgoing frames.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<WireMessage, ProtocolError> {
        encode(frame, self.encoding)
    }

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, message: &WireMessage) -> Result<Frame, ProtocolError> {
        decode(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_wire_shape() {
        let frame = Frame::new("hello", json!({"greeting": "hi"}));
        let text = encode_json(&frame).unwrap();
        assert_eq!(text, r#"["hello",{"greeting":"hi"}]"#);
    }

    #[test]
    fn test_json_decode_without_payload() {
        let frame = decode_json(r#"["ping"]"#).unwrap();
        assert_eq!(frame.event, "ping");
        assert_eq!(frame.payload, Payload::Scalar(Value::Null));
    }

    #[test]
    fn test_json_decode_rejects_non_string_event() {
        assert!(matches!(
            decode_json(r#"[42, {}]"#),
            Err(ProtocolError::Invalid(_))
        ));
        assert!(matches!(decode_json("[]"), Err(ProtocolError::Invalid(_))));
        assert!(matches!(
            decode_json(r#"{"event": "x"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let frame = Frame::new("chat", json!({"text": "hi", "_from": "A", "_to": null}));
        let encoded = encode(&frame, Encoding::MessagePack).unwrap();
        assert!(matches!(encoded, WireMessage::Binary(_)));
        assert_eq!(decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode_msgpack(&Frame::new("test", json!({}))).unwrap();

        match decode_msgpack(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let big = "x".repeat(MAX_FRAME_SIZE + 1);
        let frame = Frame::new("test", big.as_str());

        match encode(&frame, Encoding::Json) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::new("one", json!({"n": 1}));
        let frame2 = Frame::new("two", "scalar");

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        let partial_len = buf.len() - 1;
        let mut partial = BytesMut::from(&buf[..partial_len]);
        assert_eq!(decode_from(&mut partial).unwrap(), Some(frame1.clone()));
        assert_eq!(decode_from(&mut partial).unwrap(), None);

        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame1));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame2));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoding_from_settings() {
        #[derive(Deserialize)]
        struct Wrapper {
            encoding: Encoding,
        }
        let w: Wrapper = serde_json::from_str(r#"{"encoding": "msgpack"}"#).unwrap();
        assert_eq!(w.encoding, Encoding::MessagePack);
    }
}

//! Codecs for Beacon frames.
//!
//! Two encodings are supported:
//!
//! - JSON, one frame per WebSocket text message.
//! - MessagePack with a 4-byte big-endian length prefix, carried in binary
//!   messages. Several frames may share one message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

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

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire encoding of frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    MessagePack,
}

/// Encode a frame as length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Append a length-prefixed MessagePack frame to `buf`.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;
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
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let length = read_length(data)?;
    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Err(ProtocolError::Incomplete(total - data.len()));
    }
    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?)
}

/// Try to decode a frame from the front of `buf`, advancing it on success.
///
/// Returns `Ok(None)` when more bytes are needed.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let length = match read_length(buf) {
        Ok(length) => length,
        Err(ProtocolError::Incomplete(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

fn read_length(data: &[u8]) -> Result<usize, ProtocolError> {
    let Some(prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    };
    let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(length)
}

/// Encode a frame as a JSON text message.
///
/// # Errors
///
/// Returns an error if serialization fails or the text is too large.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Member, PresenceAction};
    use serde_json::json;

    #[test]
    fn test_msgpack_presence_frame() {
        let frame = Frame::presence(
            "presence-room",
            PresenceAction::Here,
            vec![
                Member::new("1").with_info(json!({"name": "Ada"})),
                Member::new("2"),
            ],
        );
        let encoded = encode(&frame).unwrap();
        assert_eq!(decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::unsubscribe("orders")).unwrap();

        match decode(&encoded[..3]) {
            Err(ProtocolError::Incomplete(1)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
        match decode(&encoded[..encoded.len() - 1]) {
            Err(ProtocolError::Incomplete(1)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode_split_frames() {
        let first = Frame::event("orders", "App\\Events\\OrderShipped", json!({"id": 1}));
        let second = Frame::event("orders", "App\\Events\\OrderShipped", json!({"id": 2}));

        let mut wire = BytesMut::new();
        encode_into(&first, &mut wire).unwrap();
        encode_into(&second, &mut wire).unwrap();

        // Feed the bytes in two halves to mimic a split binary message.
        let split = wire.len() / 2 + 3;
        let mut buf = BytesMut::from(&wire[..split]);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from(&mut buf).unwrap(), None);

        buf.extend_from_slice(&wire[split..]);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_json_text_frame() {
        let frame = decode_json(r#"{"type":"connected","session_id":"abc.1","version":1,"heartbeat":25000}"#)
            .unwrap();
        assert_eq!(frame, Frame::connected("abc.1", 25000));

        assert!(matches!(
            decode_json(r#"{"type":"bogus"}"#),
            Err(ProtocolError::Json(_))
        ));
    }
}

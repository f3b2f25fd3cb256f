//! Length-Prefixed Frame Codec
//!
//! Every message on the wire is a frame:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │ length: u32 (BE)     │ body: `length` bytes     │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! ## How the Decoder Works
//!
//! The decoder reads from a growing buffer and returns one of:
//! - `Decoded::Complete(value)` - a whole frame was consumed and its body parsed
//! - `Decoded::NeedMoreData` - the frame is incomplete, nothing was consumed
//! - `Decoded::Malformed(err)` - a whole frame was consumed but its body is invalid
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `decode()` to attempt parsing
//! 3. If complete, act on the value; trailing bytes of the next frame stay put
//! 4. If incomplete, wait for more data
//! 5. If malformed, answer with an error and carry on with the next frame
//!
//! By default any length a `u32` can express is accepted. A decoder built
//! with [`FrameDecoder::with_max_frame_size`] reports a longer declared length
//! as `Malformed`, and [`ProtocolError::is_fatal`] flags it: the body is never
//! consumed, so the stream cannot be resynchronised.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Errors for a single frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not valid JSON or does not match the expected schema
    #[error("invalid message body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The declared body length exceeds the limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Whether the connection can keep going after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. })
    }
}

/// Outcome of one decode attempt.
#[derive(Debug)]
pub enum Decoded<T> {
    Complete(T),
    NeedMoreData,
    Malformed(ProtocolError),
}

impl<T> Decoded<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Decoded::Complete(_))
    }
}

/// Incremental frame decoder.
///
/// # Example
///
/// ```
/// use dictkv::protocol::{Command, Decoded, FrameDecoder};
/// use bytes::BytesMut;
///
/// let decoder = FrameDecoder::new();
/// let mut buffer = BytesMut::from(&Command::get("name").encode().unwrap()[..]);
///
/// match decoder.decode::<Command>(&mut buffer) {
///     Decoded::Complete(cmd) => assert_eq!(cmd, Command::get("name")),
///     other => panic!("unexpected {:?}", other),
/// }
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_size: Option<usize>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder without a size limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: None,
        }
    }

    /// Creates a decoder rejecting bodies longer than `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: Some(max_frame_size),
        }
    }

    pub fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }

    /// Takes one raw frame body off the front of `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(body))` - a frame was removed from `buf`
    /// - `Ok(None)` - incomplete, `buf` is untouched
    /// - `Err(e)` - the declared length is over the limit, `buf` is untouched
    pub fn decode_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if let Some(max) = self.max_frame_size {
            if length > max {
                return Err(ProtocolError::FrameTooLarge { size: length, max });
            }
        }

        if buf.len() < HEADER_LEN + length {
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        Ok(Some(buf.split_to(length).freeze()))
    }

    /// Takes one frame off the front of `buf` and parses its JSON body.
    pub fn decode<T: DeserializeOwned>(&self, buf: &mut BytesMut) -> Decoded<T> {
        match self.decode_frame(buf) {
            Ok(Some(body)) => match serde_json::from_slice(&body) {
                Ok(value) => Decoded::Complete(value),
                Err(e) => Decoded::Malformed(ProtocolError::InvalidBody(e)),
            },
            Ok(None) => Decoded::NeedMoreData,
            Err(e) => Decoded::Malformed(e),
        }
    }
}

/// Prefixes `body` with its length.
///
/// # Panics
///
/// Panics if `body` is longer than `u32::MAX` bytes.
pub fn encode_frame(body: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    encode_frame_into(body, &mut frame);
    frame.freeze()
}

/// Appends a frame holding `body` to `dst`.
pub fn encode_frame_into(body: &[u8], dst: &mut BytesMut) {
    let length = u32::try_from(body.len()).expect("frame body exceeds u32::MAX bytes");
    dst.reserve(HEADER_LEN + body.len());
    dst.put_u32(length);
    dst.put_slice(body);
}

/// Decodes without a size limit.
///
/// This is a convenience function for simple use cases.
pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Decoded<T> {
    FrameDecoder::new().decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    fn frame(body: &str) -> BytesMut {
        BytesMut::from(&encode_frame(body.as_bytes())[..])
    }

    #[test]
    fn test_encode_frame_layout() {
        let encoded = encode_frame(b"hello");
        assert_eq!(&encoded[..], b"\x00\x00\x00\x05hello");
    }

    #[test]
    fn test_decode_get() {
        let mut buf = frame(r#"{"command":"get","key":"name"}"#);
        match decode::<Command>(&mut buf) {
            Decoded::Complete(cmd) => assert_eq!(cmd, Command::get("name")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_needs_header() {
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(matches!(
            decode::<Command>(&mut buf),
            Decoded::NeedMoreData
        ));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_needs_body() {
        let full = frame(r#"{"command":"get","key":"name"}"#);
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(matches!(
            decode::<Command>(&mut buf),
            Decoded::NeedMoreData
        ));
        assert_eq!(buf.len(), full.len() - 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let encoded = Command::set("k", "v").encode().unwrap();
        let mut buf = BytesMut::new();

        for (i, byte) in encoded.iter().enumerate() {
            buf.put_u8(*byte);
            match decode::<Command>(&mut buf) {
                Decoded::Complete(cmd) => {
                    assert_eq!(i, encoded.len() - 1);
                    assert_eq!(cmd, Command::set("k", "v"));
                }
                Decoded::NeedMoreData => assert!(i < encoded.len() - 1),
                Decoded::Malformed(e) => panic!("chunking produced {}", e),
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_trailing_bytes_untouched() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Command::get("a").encode().unwrap());
        buf.extend_from_slice(&Command::get("b").encode().unwrap()[..3]);

        assert!(decode::<Command>(&mut buf).is_complete());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_malformed_body_consumed() {
        let mut buf = frame("{not json");
        buf.extend_from_slice(&Command::get("a").encode().unwrap());

        match decode::<Command>(&mut buf) {
            Decoded::Malformed(e) => assert!(!e.is_fatal()),
            other => panic!("unexpected {:?}", other),
        }
        match decode::<Command>(&mut buf) {
            Decoded::Complete(cmd) => assert_eq!(cmd, Command::get("a")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_command_is_malformed() {
        let mut buf = frame(r#"{"key":"a"}"#);
        assert!(matches!(
            decode::<Command>(&mut buf),
            Decoded::Malformed(ProtocolError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_empty_frame_is_malformed() {
        let mut buf = frame("");
        assert!(matches!(
            decode::<Command>(&mut buf),
            Decoded::Malformed(_)
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_large_frame_waits_for_body() {
        let value = "x".repeat(17 * 1024 * 1024);
        let encoded = Command::set("k", value.clone()).encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..16]);
        assert!(matches!(
            decode::<Command>(&mut buf),
            Decoded::NeedMoreData
        ));
        assert_eq!(buf.len(), 16);

        buf.extend_from_slice(&encoded[16..]);
        match decode::<Command>(&mut buf) {
            Decoded::Complete(cmd) => assert_eq!(cmd, Command::set("k", value)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_too_large() {
        let decoder = FrameDecoder::with_max_frame_size(8);
        let mut buf = frame(r#"{"command":"get","key":"name"}"#);
        let len = buf.len();

        match decoder.decode::<Command>(&mut buf) {
            Decoded::Malformed(e) => assert!(e.is_fatal()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(buf.len(), len);
    }
}

//! Binary frame format.
//!
//! Frame layout (5 bytes header + body):
//!
//! ```text
//! +--------+------+----------------+
//! | length | code |      body      |
//! | 4 bytes|1 byte| length-1 bytes |
//! +--------+------+----------------+
//! ```
//!
//! `length` is a big-endian `u32` counting the code byte plus the body, so a
//! message with an empty body has `length == 1`.

use crate::code::MessageCode;
use crate::error::ProtocolError;
use crate::MAX_BODY_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes (4 length + 1 code).
pub const HEADER_SIZE: usize = 5;

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Message type.
    pub code: MessageCode,
    /// Message body, possibly empty.
    pub body: Bytes,
}

impl WireMessage {
    /// Creates a message with the given body.
    pub fn new(code: MessageCode, body: Bytes) -> Self {
        Self { code, body }
    }

    /// Creates a message with an empty body.
    pub fn empty(code: MessageCode) -> Self {
        Self::new(code, Bytes::new())
    }

    /// Creates a message whose body is the JSON encoding of `value`.
    pub fn from_json<T: serde::Serialize>(
        code: MessageCode,
        value: &T,
    ) -> Result<Self, ProtocolError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(code, Bytes::from(body)))
    }

    /// Returns whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Decodes the body as JSON.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Encodes the message into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let body_len = self.body.len();
        if body_len > MAX_BODY_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: u32::try_from(body_len).unwrap_or(u32::MAX),
                max: MAX_BODY_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        buf.put_u32(body_len as u32 + 1);
        buf.put_u8(self.code.code());
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a message from bytes.
    ///
    /// Returns `Ok(Some(message))` if a complete message was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on framing errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&buf[..HEADER_SIZE]);
        let (code, body_len) = parse_header(&header)?;

        if buf.len() < HEADER_SIZE + body_len {
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let body = buf.split_to(body_len).freeze();

        Ok(Some(Self { code, body }))
    }
}

/// Parses a frame header into the message code and body length.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> Result<(MessageCode, usize), ProtocolError> {
    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if length == 0 {
        return Err(ProtocolError::InvalidLength(length));
    }

    let body_len = length - 1;
    if body_len > MAX_BODY_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body_len,
            max: MAX_BODY_SIZE,
        });
    }

    let code = MessageCode::try_from(header[4])?;
    Ok((code, body_len as usize))
}

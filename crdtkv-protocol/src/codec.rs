//! Typed message encoding.

use crate::code::MessageCode;
use crate::error::ProtocolError;
use crate::frame::WireMessage;
use bytes::BytesMut;

/// Encodes payloads into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a message, serializing `payload` as JSON when present.
    ///
    /// An absent payload produces an empty body.
    pub fn encode<T: serde::Serialize>(
        code: MessageCode,
        payload: Option<&T>,
    ) -> Result<BytesMut, ProtocolError> {
        let message = match payload {
            Some(value) => WireMessage::from_json(code, value)?,
            None => WireMessage::empty(code),
        };
        message.encode()
    }

    /// Encodes a message with an empty body.
    pub fn encode_empty(code: MessageCode) -> Result<BytesMut, ProtocolError> {
        WireMessage::empty(code).encode()
    }
}

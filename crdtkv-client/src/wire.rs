//! Framed request/response exchange over a blocking stream.

use crate::error::ClientError;
use bytes::Bytes;
use crdtkv_protocol::message::ErrorResp;
use crdtkv_protocol::{
    parse_header, Encoder, ErrorCode, MessageCode, ProtocolError, WireMessage, HEADER_SIZE,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Reads and writes whole frames on a byte stream.
///
/// Every call either transfers complete frames or fails. A failed call may
/// leave a partial frame on the stream, so callers must discard the stream
/// after any network error.
#[derive(Debug)]
pub struct Wire<S> {
    stream: S,
}

impl<S: Read + Write> Wire<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Writes one message and flushes it.
    ///
    /// The payload is JSON-encoded; `None` sends an empty body.
    pub fn write<T: Serialize>(
        &mut self,
        code: MessageCode,
        payload: Option<&T>,
    ) -> Result<(), ClientError> {
        let frame = Encoder::encode(code, payload).map_err(|e| match e {
            // Nothing was sent, so the connection and node are still good.
            ProtocolError::FrameTooLarge { size, max } => ClientError::PayloadTooLarge {
                size: size as usize,
                max: max as usize,
            },
            other => ClientError::Protocol(other),
        })?;
        tracing::debug!("Sending {} ({} bytes)", code, frame.len());
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Writes a message with an empty body.
    pub fn write_empty(&mut self, code: MessageCode) -> Result<(), ClientError> {
        self.write::<()>(code, None)
    }

    /// Reads exactly one message.
    pub fn receive(&mut self) -> Result<WireMessage, ClientError> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header)?;
        let (code, body_len) = parse_header(&header)?;

        let mut body = vec![0u8; body_len];
        self.stream.read_exact(&mut body)?;
        tracing::debug!("Received {} ({} byte body)", code, body_len);

        Ok(WireMessage::new(code, Bytes::from(body)))
    }

    /// Reads one message and checks that it is `expected`.
    ///
    /// An error response always wins over the code check and is returned as
    /// [`ClientError::Server`].
    pub fn expect_message(&mut self, expected: MessageCode) -> Result<WireMessage, ClientError> {
        let message = self.receive()?;

        if message.code == MessageCode::ErrorResp {
            let resp = if message.is_empty() {
                ErrorResp::new(ErrorCode::Unspecified, "")
            } else {
                message.decode_json::<ErrorResp>()?
            };
            return Err(ClientError::Server {
                code: resp.code(),
                message: resp.errmsg,
            });
        }

        if message.code != expected {
            return Err(ClientError::UnexpectedResponse {
                expected,
                actual: message.code,
            });
        }

        Ok(message)
    }

    /// Expects `expected` and ignores its body.
    pub fn expect_ack(&mut self, expected: MessageCode) -> Result<(), ClientError> {
        self.expect_message(expected).map(|_| ())
    }

    /// Expects `expected` and decodes its body.
    ///
    /// An empty body decodes as the JSON `null`, so only payloads that accept
    /// `null` tolerate it.
    pub fn expect<T: DeserializeOwned>(&mut self, expected: MessageCode) -> Result<T, ClientError> {
        let message = self.expect_message(expected)?;
        if message.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)
                .map_err(crdtkv_protocol::ProtocolError::from)?);
        }
        Ok(message.decode_json()?)
    }

    /// Expects `expected`, returning `None` for an empty body.
    pub fn expect_optional<T: DeserializeOwned>(
        &mut self,
        expected: MessageCode,
    ) -> Result<Option<T>, ClientError> {
        let message = self.expect_message(expected)?;
        if message.is_empty() {
            return Ok(None);
        }
        Ok(Some(message.decode_json()?))
    }

    /// Sends a request and expects the acknowledging message.
    pub fn round_trip<T: Serialize>(
        &mut self,
        code: MessageCode,
        payload: Option<&T>,
        expected: MessageCode,
    ) -> Result<WireMessage, ClientError> {
        self.write(code, payload)?;
        self.expect_message(expected)
    }
}

//! # crdtkv-protocol
//!
//! Wire protocol implementation for crdtkv.
//!
//! This crate provides:
//! - Length-prefixed binary framing with a one-byte message code
//! - The closed table of message codes
//! - JSON payload types for requests and responses
//! - Error-response codes and framing errors

pub mod code;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use code::MessageCode;
pub use codec::Encoder;
pub use error::{ErrorCode, ProtocolError};
pub use frame::{parse_header, WireMessage, HEADER_SIZE};

/// Default port for crdtkv nodes.
pub const DEFAULT_PORT: u16 = 8087;

/// Maximum frame body size (64 MiB).
pub const MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

//! Client error types.

use crate::config::ConfigError;
use crate::crdt::CrdtType;
use crate::node::NodeId;
use crdtkv_protocol::{ErrorCode, MessageCode, ProtocolError};
use std::io;
use thiserror::Error;

/// Client errors.
///
/// Errors fall into four groups, and only the first one is ever retried:
/// - network: the connection is broken and the node is penalized
/// - protocol: the node answered, but with an error or the wrong message
/// - domain: a protocol error re-classified into something actionable
/// - usage: the request was rejected before any I/O
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("failed to connect to {node}: {source}")]
    Connect {
        node: NodeId,
        #[source]
        source: Box<ClientError>,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("server error: {code} - {message}")]
    Server { code: ErrorCode, message: String },

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: MessageCode,
        actual: MessageCode,
    },

    #[error("CRDT precondition failed: {message}")]
    Precondition { message: String },

    #[error("empty operation list")]
    EmptyOperations,

    #[error("cannot combine {found} operations with {expected} operations")]
    MixedTypes { expected: CrdtType, found: CrdtType },

    #[error("{0} cannot be updated outside a map")]
    NotTopLevel(CrdtType),

    #[error("{0} cannot be embedded in a map")]
    NotEmbeddable(CrdtType),

    #[error("delete operations must name a map field")]
    RootDelete,

    #[error("root operations must not name a field ('{0}')")]
    NamedRoot(String),

    #[error("counter deltas overflow a 64-bit increment")]
    CounterOverflow,

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("operations nested in a map must name their field")]
    UnnamedField,

    #[error("conflicting values for map field '{field}'")]
    ConflictingUpdates { field: String },

    #[error("removal requires a causal context; fetch the value first")]
    MissingContext,

    #[error("fetch requires a key")]
    MissingKey,

    #[error("no nodes configured")]
    NoNodes,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ClientError::ConnectionClosed,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ClientError::Timeout,
            _ => ClientError::Io(err),
        }
    }
}

impl ClientError {
    /// Returns whether this is a transport failure.
    ///
    /// Network errors are the only ones the coordinator retries and the only
    /// ones that count against a node's health.
    pub fn is_network(&self) -> bool {
        match self {
            ClientError::Io(_)
            | ClientError::ConnectionClosed
            | ClientError::Timeout
            | ClientError::TlsHandshake(_) => true,
            ClientError::Protocol(e) => e.is_framing(),
            ClientError::Connect { source, .. } => source.is_network(),
            _ => false,
        }
    }

    /// Returns whether the request was rejected before any I/O.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            ClientError::EmptyOperations
                | ClientError::MixedTypes { .. }
                | ClientError::NotTopLevel(_)
                | ClientError::NotEmbeddable(_)
                | ClientError::RootDelete
                | ClientError::NamedRoot(_)
                | ClientError::CounterOverflow
                | ClientError::PayloadTooLarge { .. }
                | ClientError::UnnamedField
                | ClientError::ConflictingUpdates { .. }
                | ClientError::MissingContext
                | ClientError::MissingKey
        )
    }

    /// Returns the node a connection attempt failed against, if known.
    pub fn failed_node(&self) -> Option<&NodeId> {
        match self {
            ClientError::Connect { node, .. } => Some(node),
            _ => None,
        }
    }
}

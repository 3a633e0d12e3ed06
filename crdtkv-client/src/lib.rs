//! # crdtkv-client
//!
//! Client library for crdtkv clusters.
//!
//! This crate provides:
//! - Pooled TCP connections with optional TLS and authentication
//! - Health-scored node selection with automatic failover
//! - Building and serializing CRDT updates, decoding fetched values
//! - Configuration from YAML files and the environment

pub mod client;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod crdt;
pub mod error;
pub mod node;
pub mod pool;
pub mod score;
pub mod stream;
pub mod tls;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use client::{Client, PoolStats};
pub use config::{ClientConfig, ConfigError, Credentials, TlsClientConfig};
pub use connection::{Connection, ConnectionSettings};
pub use coordinator::RequestCoordinator;
pub use crdt::{
    CrdtLoader, CrdtLocation, CrdtOperation, CrdtOperator, CrdtType, CrdtValue, FetchOptions,
    Loaded, MapValue, OperationValue, SetDelta, UpdateOptions, UpdateResponse,
};
pub use error::ClientError;
pub use node::{choose_node, Exclusions, Node, NodeId, SelectionPolicy};
pub use pool::{Pool, PooledConnection};
pub use score::DecayingScore;
pub use wire::Wire;

//! High-level client API.

use crate::config::{ClientConfig, Credentials};
use crate::connection::{Connection, ConnectionSettings};
use crate::coordinator::RequestCoordinator;
use crate::crdt::{
    CrdtLoader, CrdtLocation, CrdtOperation, CrdtOperator, FetchOptions, Loaded, UpdateOptions,
    UpdateResponse,
};
use crate::error::ClientError;
use crate::node::{choose_node, Exclusions, Node};
use crate::pool::Pool;
use crdtkv_protocol::message::ServerInfoResp;
use parking_lot::RwLock;
use std::sync::Arc;

/// Snapshot of connection pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub on_loan: usize,
}

/// Client for a crdtkv cluster.
///
/// Cheap to share between threads; every request borrows a pooled connection
/// for its duration and retries transport failures on other nodes.
pub struct Client {
    config: ClientConfig,
    nodes: Vec<Arc<Node>>,
    settings: Arc<RwLock<ConnectionSettings>>,
    pool: Pool<Connection>,
    coordinator: RequestCoordinator,
}

impl Client {
    /// Creates a client. No connection is opened until the first request.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let policy = config.selection_policy();
        let nodes: Vec<Arc<Node>> = config
            .nodes
            .iter()
            .map(|id| Arc::new(Node::new(id.clone(), policy.half_life)))
            .collect();
        let settings = Arc::new(RwLock::new(ConnectionSettings::from_config(&config)));

        let factory = {
            let nodes = nodes.clone();
            let settings = Arc::clone(&settings);
            move |excluded: &Exclusions| {
                let node = choose_node(&nodes, excluded, &policy, &mut rand::thread_rng())
                    .ok_or(ClientError::NoNodes)?;
                let settings = settings.read().clone();
                Connection::open(Arc::clone(&node), &settings).map_err(|e| {
                    if e.is_network() {
                        node.record_failure();
                    }
                    ClientError::Connect {
                        node: node.id().clone(),
                        source: Box::new(e),
                    }
                })
            }
        };
        let pool = Pool::new(Box::new(factory), Box::new(Connection::close))
            .with_max_size(config.pool.max_size);

        tracing::debug!(
            "Client configured with {} nodes, {} retries",
            nodes.len(),
            config.max_retries
        );

        Ok(Self {
            coordinator: RequestCoordinator::new(config.max_retries),
            config,
            nodes,
            settings,
            pool,
        })
    }

    /// Creates a client from `CRDTKV_CONFIG` and the environment.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::load()?)
    }

    /// Pings a node.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.coordinator.perform(&self.pool, |conn| conn.ping())
    }

    /// Returns a node's self-description.
    pub fn server_info(&self) -> Result<ServerInfoResp, ClientError> {
        self.coordinator.perform(&self.pool, |conn| conn.server_info())
    }

    /// Applies `ops` to the CRDT at `location`.
    ///
    /// The operations are validated and serialized before any connection is
    /// used, so usage errors never touch the network.
    pub fn update(
        &self,
        location: &CrdtLocation,
        ops: &[CrdtOperation],
        options: &UpdateOptions,
    ) -> Result<UpdateResponse, ClientError> {
        let (req, kind) = CrdtOperator::prepare(location, ops, options)?;
        tracing::debug!("Updating {} ({} operations)", location, ops.len());
        self.coordinator
            .perform(&self.pool, |conn| CrdtOperator::send(conn.wire(), &req, kind))
    }

    /// Fetches the CRDT at `location` and its causal context.
    pub fn fetch(
        &self,
        location: &CrdtLocation,
        options: &FetchOptions,
    ) -> Result<Loaded, ClientError> {
        let req = CrdtLoader::request(location, options)?;
        tracing::debug!("Fetching {}", location);
        self.coordinator
            .perform(&self.pool, |conn| CrdtLoader::send(conn.wire(), &req))
    }

    /// Runs arbitrary work on a pooled connection with the usual retry rules.
    pub fn with_connection<T, F>(&self, work: F) -> Result<T, ClientError>
    where
        F: FnMut(&mut Connection) -> Result<T, ClientError>,
    {
        self.coordinator.perform(&self.pool, work)
    }

    /// Replaces the credentials used for new connections.
    ///
    /// Idle connections authenticated with the old credentials are closed;
    /// connections in use are closed when they are returned.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        self.settings.write().credentials = credentials;
        self.pool.clear();
    }

    /// Closes all idle connections.
    pub fn close(&self) {
        self.pool.clear();
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Returns the configuration the client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            idle: self.pool.idle_count(),
            on_loan: self.pool.on_loan_count(),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{CrdtType, SetDelta};
    use crate::node::NodeId;
    use crate::test_support::{reply_empty, reply_error, FakeNode, FakeStore, Reply};
    use crdtkv_protocol::{ErrorCode, MessageCode};
    use std::time::Duration;

    fn client_for(nodes: Vec<NodeId>) -> Client {
        let config = ClientConfig::default()
            .with_nodes(nodes)
            .with_read_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(1));
        Client::new(config).unwrap()
    }

    fn pinger() -> FakeNode {
        FakeNode::spawn(|msg| match msg.code {
            MessageCode::PingReq => reply_empty(MessageCode::PingResp),
            MessageCode::AuthReq => reply_empty(MessageCode::AuthResp),
            _ => Reply::Hangup,
        })
    }

    fn store_node() -> FakeNode {
        let store = FakeStore::new();
        FakeNode::spawn(move |msg| store.handle(msg))
    }

    #[test]
    fn test_fails_over_to_healthy_node() {
        let broken = FakeNode::spawn(|_| Reply::Hangup);
        let healthy = pinger();
        let client = client_for(vec![broken.node_id(), healthy.node_id()]);
        // Make the broken node the only one under the threshold so it is tried first.
        client.nodes()[1].score().add(0.5);

        client.ping().unwrap();

        assert_eq!(broken.connections(), 1);
        assert_eq!(healthy.connections(), 1);
        assert!(client.nodes()[0].score().read() > 0.9);
        assert_eq!(client.pool_stats(), PoolStats { idle: 1, on_loan: 0 });
    }

    #[test]
    fn test_retries_are_bounded_and_spread() {
        let nodes: Vec<FakeNode> = (0..3).map(|_| FakeNode::spawn(|_| Reply::Hangup)).collect();
        let client = client_for(nodes.iter().map(FakeNode::node_id).collect());

        let err = client.ping().unwrap_err();
        assert!(err.is_network());

        for node in &nodes {
            assert_eq!(node.connections(), 1);
        }
        for node in client.nodes() {
            assert!(!node.is_healthy(client.config().selection.error_threshold));
        }
        assert_eq!(client.pool_stats(), PoolStats { idle: 0, on_loan: 0 });
    }

    #[test]
    fn test_unreachable_node_is_skipped() {
        let healthy = pinger();
        let client = client_for(vec![FakeNode::unreachable(), healthy.node_id()]);
        client.nodes()[1].score().add(0.5);

        client.ping().unwrap();
        assert!(client.nodes()[0].score().read() > 0.9);
    }

    #[test]
    fn test_server_error_is_not_retried() {
        let node = FakeNode::spawn(|_| reply_error(ErrorCode::Overloaded, "busy"));
        let client = client_for(vec![node.node_id()]);

        let err = client.ping().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ErrorCode::Overloaded,
                ..
            }
        ));
        assert_eq!(node.requests().len(), 1);
        assert!(client.nodes()[0].is_healthy(0.1));
    }

    #[test]
    fn test_precondition_failure() {
        let node = FakeNode::spawn(|msg| match msg.code {
            MessageCode::DtUpdateReq => {
                reply_error(ErrorCode::PreconditionFailed, "context is stale")
            }
            _ => Reply::Hangup,
        });
        let client = client_for(vec![node.node_id()]);

        let err = client
            .update(
                &CrdtLocation::new("sets", "tags", "post-1"),
                &[CrdtOperation::set(SetDelta::new().remove("old"))],
                &UpdateOptions::default().with_context(Some(vec![0])),
            )
            .unwrap_err();

        assert!(matches!(err, ClientError::Precondition { .. }));
        assert_eq!(node.requests().len(), 1);
        assert!(client.nodes()[0].is_healthy(0.1));
    }

    #[test]
    fn test_legacy_precondition_failure() {
        let node = FakeNode::spawn(|_| reply_error(ErrorCode::Unspecified, "Precondition failed"));
        let client = client_for(vec![node.node_id()]);

        let err = client
            .update(
                &CrdtLocation::new("maps", "users", "alice"),
                &[CrdtOperation::map(vec![CrdtOperation::delete_field(
                    "nick",
                    CrdtType::Register,
                )])],
                &UpdateOptions::default().with_context(Some(vec![0])),
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::Precondition { .. }));
    }

    #[test]
    fn test_usage_errors_precede_io() {
        let node = pinger();
        let client = client_for(vec![node.node_id()]);
        let location = CrdtLocation::new("sets", "tags", "post-1");

        let err = client
            .update(
                &location,
                &[CrdtOperation::set(SetDelta::new().remove("a"))],
                &UpdateOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingContext));
        assert!(err.is_usage());

        let err = client
            .fetch(
                &CrdtLocation::without_key("sets", "tags"),
                &FetchOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingKey));

        assert_eq!(node.connections(), 0);
    }

    #[test]
    fn test_oversized_update_leaves_nodes_alone() {
        let a = store_node();
        let b = store_node();
        let client = client_for(vec![a.node_id(), b.node_id()]);
        let huge = "x".repeat(crdtkv_protocol::MAX_BODY_SIZE as usize + 1);

        let err = client
            .update(
                &CrdtLocation::new("sets", "tags", "post-1"),
                &[CrdtOperation::set(SetDelta::new().add(huge))],
                &UpdateOptions::default(),
            )
            .unwrap_err();

        assert!(matches!(err, ClientError::PayloadTooLarge { .. }));
        assert!(err.is_usage());
        assert_eq!(a.connections() + b.connections(), 0);
        for node in client.nodes() {
            assert_eq!(node.score().read(), 0.0);
        }
    }

    #[test]
    fn test_map_round_trip() {
        let node = store_node();
        let client = client_for(vec![node.node_id()]);
        let location = CrdtLocation::new("maps", "users", "alice");

        let fresh = client.fetch(&location, &FetchOptions::default()).unwrap();
        assert_eq!(fresh.value, crate::crdt::CrdtValue::Map(Default::default()));
        assert!(fresh.context.is_none());

        let updated = client
            .update(
                &location,
                &[CrdtOperation::map(vec![
                    CrdtOperation::update_field("logins", 2i64),
                    CrdtOperation::update_field("name", "ada"),
                    CrdtOperation::update_field("admin", true),
                    CrdtOperation::update_field("tags", SetDelta::new().add("rust").add("math")),
                    CrdtOperation::update_field(
                        "address",
                        vec![CrdtOperation::update_field("city", "London")],
                    ),
                ])],
                &UpdateOptions::default(),
            )
            .unwrap();
        let value = updated.value.unwrap();
        assert_eq!(value.as_map().unwrap().counter("logins"), Some(2));

        let loaded = client.fetch(&location, &FetchOptions::default()).unwrap();
        let map = loaded.value.as_map().unwrap();
        assert_eq!(map.counter("logins"), Some(2));
        assert_eq!(map.register("name"), Some("ada"));
        assert_eq!(map.flag("admin"), Some(true));
        assert_eq!(map.set("tags").unwrap().len(), 2);
        assert_eq!(map.map("address").unwrap().register("city"), Some("London"));

        client
            .update(
                &location,
                &[CrdtOperation::map(vec![
                    CrdtOperation::delete_field("name", CrdtType::Register),
                    CrdtOperation::update_field("tags", SetDelta::new().remove("math")),
                ])],
                &UpdateOptions::default().with_context(loaded.context.clone()),
            )
            .unwrap();

        let reloaded = client.fetch(&location, &FetchOptions::default()).unwrap();
        let map = reloaded.value.as_map().unwrap();
        assert_eq!(map.register("name"), None);
        assert_eq!(map.set("tags").unwrap().len(), 1);

        // The old context no longer matches.
        let err = client
            .update(
                &location,
                &[CrdtOperation::map(vec![CrdtOperation::delete_field(
                    "admin",
                    CrdtType::Flag,
                )])],
                &UpdateOptions::default().with_context(loaded.context),
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::Precondition { .. }));

        // Both fetches and all updates reused one connection.
        assert_eq!(node.connections(), 1);
    }

    #[test]
    fn test_counter_and_hll() {
        let node = store_node();
        let client = client_for(vec![node.node_id()]);
        let counter = CrdtLocation::new("counters", "hits", "home");

        let resp = client
            .update(
                &counter,
                &[CrdtOperation::increment(5), CrdtOperation::increment(-2)],
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(resp.value.and_then(|v| v.as_counter()), Some(3));

        let visitors = CrdtLocation::new("hlls", "visitors", "today");
        client
            .update(
                &visitors,
                &[CrdtOperation::hll_add(["u1", "u2", "u1"])],
                &UpdateOptions::default().without_body(),
            )
            .unwrap();
        let loaded = client.fetch(&visitors, &FetchOptions::default()).unwrap();
        assert_eq!(loaded.value.as_hyper_log_log(), Some(2));
    }

    #[test]
    fn test_server_assigned_key() {
        let node = store_node();
        let client = client_for(vec![node.node_id()]);

        let resp = client
            .update(
                &CrdtLocation::without_key("sets", "tags"),
                &[CrdtOperation::set(SetDelta::new().add("a"))],
                &UpdateOptions::default(),
            )
            .unwrap();
        let key = resp.key.unwrap();

        let loaded = client
            .fetch(&CrdtLocation::new("sets", "tags", key), &FetchOptions::default())
            .unwrap();
        assert!(loaded.value.as_set().unwrap().contains("a"));
    }

    #[test]
    fn test_set_credentials_clears_pool() {
        let node = pinger();
        let client = client_for(vec![node.node_id()]);

        client.ping().unwrap();
        assert_eq!(client.pool_stats().idle, 1);

        client.set_credentials(Some(Credentials::new("ada", "lovelace")));
        assert_eq!(client.pool_stats().idle, 0);

        client.ping().unwrap();
        assert_eq!(node.connections(), 2);
        let codes: Vec<MessageCode> = node.requests().iter().map(|m| m.code).collect();
        assert_eq!(
            codes,
            vec![MessageCode::PingReq, MessageCode::AuthReq, MessageCode::PingReq]
        );
    }

    #[test]
    fn test_concurrent_requests_share_pool() {
        let node = store_node();
        let client = Arc::new(client_for(vec![node.node_id()]));
        let location = CrdtLocation::new("counters", "hits", "shared");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = Arc::clone(&client);
                let location = location.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        client
                            .update(
                                &location,
                                &[CrdtOperation::increment(1)],
                                &UpdateOptions::default().without_body(),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = client.fetch(&location, &FetchOptions::default()).unwrap();
        assert_eq!(loaded.value.as_counter(), Some(40));
        assert!(node.connections() <= 4);
        assert_eq!(client.pool_stats().on_loan, 0);
    }

    #[test]
    fn test_with_connection() {
        let node = pinger();
        let client = client_for(vec![node.node_id()]);

        let id = client
            .with_connection(|conn| {
                conn.ping()?;
                Ok(conn.node().id().clone())
            })
            .unwrap();
        assert_eq!(id, node.node_id());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Client::new(ClientConfig::default().with_nodes(Vec::<NodeId>::new()));
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}

//! Connection management.

use crate::config::{ClientConfig, Credentials, TlsClientConfig};
use crate::error::ClientError;
use crate::node::{Node, NodeId};
use crate::pool::Pooled;
use crate::stream::ClientStream;
use crate::tls;
use crate::wire::Wire;
use crdtkv_protocol::message::{AuthReq, ServerInfoResp};
use crdtkv_protocol::MessageCode;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to open a connection to any node.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Bounds the TCP connect and each handshake step.
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub tls: Option<TlsClientConfig>,
    pub credentials: Option<Credentials>,
}

impl ConnectionSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            tls: config.tls.clone(),
            credentials: config.credentials.clone(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// An open, handshaken connection to one node.
#[derive(Debug)]
pub struct Connection {
    node: Arc<Node>,
    wire: Wire<ClientStream>,
}

impl Connection {
    /// Connects to `node`, upgrades to TLS and authenticates as configured.
    pub fn open(node: Arc<Node>, settings: &ConnectionSettings) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", node.id());

        let tcp = connect_tcp(node.id(), settings.connect_timeout)?;
        tcp.set_nodelay(true).ok();
        // The handshake is bounded by the connect timeout.
        tcp.set_read_timeout(Some(settings.connect_timeout))?;
        tcp.set_write_timeout(Some(settings.connect_timeout))?;

        let stream = match settings.tls {
            Some(ref tls_config) => start_tls(node.id(), tls_config, tcp)?,
            None => ClientStream::Plain(tcp),
        };

        let mut conn = Self {
            node,
            wire: Wire::new(stream),
        };
        if let Some(ref credentials) = settings.credentials {
            conn.authenticate(credentials)?;
            tracing::debug!("Authenticated to {} as {}", conn.node.id(), credentials.user);
        }

        let tcp = conn.wire.get_ref().tcp();
        tcp.set_read_timeout(settings.read_timeout)?;
        tcp.set_write_timeout(settings.write_timeout)?;

        tracing::debug!("Connected to {} (tls={})", conn.node.id(), conn.is_tls());
        Ok(conn)
    }

    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), ClientError> {
        let req = AuthReq {
            user: credentials.user.clone(),
            password: credentials.password.clone(),
        };
        self.wire.write(MessageCode::AuthReq, Some(&req))?;
        self.wire.expect_ack(MessageCode::AuthResp)
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Returns the framed stream for issuing requests.
    pub fn wire(&mut self) -> &mut Wire<ClientStream> {
        &mut self.wire
    }

    pub fn is_tls(&self) -> bool {
        self.wire.get_ref().is_tls()
    }

    /// Sends a ping and waits for the reply.
    pub fn ping(&mut self) -> Result<(), ClientError> {
        self.wire.write_empty(MessageCode::PingReq)?;
        self.wire.expect_ack(MessageCode::PingResp)
    }

    /// Asks the node to describe itself.
    pub fn server_info(&mut self) -> Result<ServerInfoResp, ClientError> {
        self.wire.write_empty(MessageCode::GetServerInfoReq)?;
        Ok(self
            .wire
            .expect_optional(MessageCode::GetServerInfoResp)?
            .unwrap_or_default())
    }

    /// Closes the connection.
    pub fn close(self) {
        tracing::debug!("Closing connection to {}", self.node.id());
        let mut stream = self.wire.into_inner();
        if let Err(e) = stream.shutdown() {
            tracing::debug!("Shutdown of {} failed: {}", self.node.id(), e);
        }
    }
}

impl Pooled for Connection {
    fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

/// Connects to the first reachable address of `id`.
fn connect_tcp(id: &NodeId, timeout: Duration) -> Result<TcpStream, ClientError> {
    let mut last_err = None;
    for addr in (id.host.as_str(), id.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Connection to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    let err = last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", id))
    });
    Err(err.into())
}

/// Negotiates the upgrade in plain text, then performs the TLS handshake.
fn start_tls(
    id: &NodeId,
    tls_config: &TlsClientConfig,
    mut tcp: TcpStream,
) -> Result<ClientStream, ClientError> {
    let (config, server_name) = tls::client_config(tls_config, &id.host)?;
    {
        let mut wire = Wire::new(&mut tcp);
        wire.write_empty(MessageCode::StartTls)?;
        wire.expect_ack(MessageCode::StartTls)?;
    }
    tracing::debug!("Performing TLS handshake with {}...", id);
    tls::connect_tls(config, server_name, tcp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::DEFAULT_HALF_LIFE;
    use crate::test_support::{reply_empty, reply_error, reply_json, FakeNode, Reply};
    use crdtkv_protocol::ErrorCode;

    fn node(id: NodeId) -> Arc<Node> {
        Arc::new(Node::new(id, DEFAULT_HALF_LIFE))
    }

    #[test]
    fn test_open_and_ping() {
        let fake = FakeNode::spawn(|msg| match msg.code {
            MessageCode::PingReq => reply_empty(MessageCode::PingResp),
            _ => Reply::Hangup,
        });

        let mut conn = Connection::open(node(fake.node_id()), &ConnectionSettings::default()).unwrap();
        assert!(!conn.is_tls());
        conn.ping().unwrap();
        conn.ping().unwrap();
        conn.close();

        assert_eq!(fake.connections(), 1);
        assert_eq!(fake.requests().len(), 2);
    }

    #[test]
    fn test_server_info() {
        let fake = FakeNode::spawn(|_| {
            reply_json(
                MessageCode::GetServerInfoResp,
                &ServerInfoResp {
                    node: Some("db1@127.0.0.1".to_string()),
                    server_version: Some("3.2.0".to_string()),
                },
            )
        });

        let mut conn = Connection::open(node(fake.node_id()), &ConnectionSettings::default()).unwrap();
        let info = conn.server_info().unwrap();
        assert_eq!(info.server_version.as_deref(), Some("3.2.0"));
    }

    #[test]
    fn test_authenticates_when_configured() {
        let fake = FakeNode::spawn(|msg| match msg.code {
            MessageCode::AuthReq => {
                let req: AuthReq = msg.decode_json().unwrap();
                if req.user == "ada" && req.password == "lovelace" {
                    reply_empty(MessageCode::AuthResp)
                } else {
                    reply_error(ErrorCode::Unauthorized, "bad credentials")
                }
            }
            _ => reply_empty(MessageCode::PingResp),
        });

        let settings = ConnectionSettings {
            credentials: Some(Credentials::new("ada", "lovelace")),
            ..Default::default()
        };
        let mut conn = Connection::open(node(fake.node_id()), &settings).unwrap();
        conn.ping().unwrap();

        let wrong = ConnectionSettings {
            credentials: Some(Credentials::new("ada", "nope")),
            ..Default::default()
        };
        let err = Connection::open(node(fake.node_id()), &wrong).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ErrorCode::Unauthorized,
                ..
            }
        ));
        assert!(!err.is_network());
    }

    #[test]
    fn test_start_tls_refused() {
        let fake = FakeNode::spawn(|msg| match msg.code {
            MessageCode::StartTls => reply_error(ErrorCode::BadRequest, "TLS not enabled"),
            _ => Reply::Hangup,
        });

        let settings = ConnectionSettings {
            tls: Some(TlsClientConfig::new().with_insecure()),
            ..Default::default()
        };
        let err = Connection::open(node(fake.node_id()), &settings).unwrap_err();
        assert!(matches!(err, ClientError::Server { .. }));
        assert_eq!(fake.requests()[0].code, MessageCode::StartTls);
    }

    #[test]
    fn test_unreachable_node_is_network_error() {
        let err = Connection::open(node(FakeNode::unreachable()), &ConnectionSettings::default())
            .unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_read_timeout_is_network_error() {
        let fake = FakeNode::spawn(|_| Reply::Silence);
        let settings = ConnectionSettings {
            read_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };

        let mut conn = Connection::open(node(fake.node_id()), &settings).unwrap();
        let err = conn.ping().unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }
}

//! Retrying request execution across cluster nodes.

use crate::error::ClientError;
use crate::node::Exclusions;
use crate::pool::{Pool, Pooled};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Runs units of work against pooled connections, retrying transport
/// failures on other nodes.
///
/// Only network errors are retried. A request that reached the server and was
/// rejected is returned to the caller unchanged, because replaying it could
/// apply its side effects twice.
#[derive(Debug, Clone, Copy)]
pub struct RequestCoordinator {
    max_retries: u32,
}

impl RequestCoordinator {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Acquires a connection, runs `work` on it, and settles the connection.
    ///
    /// On a network error the node is penalized and excluded, the connection
    /// is discarded, and the work is retried until `1 + max_retries` attempts
    /// have been made. The last network error is returned once attempts run
    /// out.
    pub fn perform<C, T, F>(&self, pool: &Pool<C>, mut work: F) -> Result<T, ClientError>
    where
        C: Pooled,
        F: FnMut(&mut C) -> Result<T, ClientError>,
    {
        let mut excluded = Exclusions::new();
        let mut attempts_left = 1 + self.max_retries;

        loop {
            let mut conn = match pool.acquire(&excluded) {
                Ok(conn) => conn,
                Err(e) if e.is_network() => {
                    // The factory already penalized the node it picked.
                    if let Some(node) = e.failed_node() {
                        excluded.insert(node.clone());
                    }
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(e);
                    }
                    tracing::warn!("Connect failed ({}), {} attempts left", e, attempts_left);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match work(&mut conn) {
                Ok(value) => {
                    conn.release();
                    return Ok(value);
                }
                Err(e) if e.is_network() => {
                    let node = conn.node().clone();
                    node.record_failure();
                    excluded.insert(node.id().clone());
                    conn.discard();

                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(e);
                    }
                    tracing::warn!(
                        "Request to {} failed ({}), {} attempts left",
                        node.id(),
                        e,
                        attempts_left
                    );
                }
                Err(e) => {
                    conn.release();
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RequestCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::pool::tests::{cluster, fake_pool, FakeConn};
    use crdtkv_protocol::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup(names: &[&str]) -> (Pool<FakeConn>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let pool = fake_pool(cluster(names), created.clone(), torn_down.clone());
        (pool, created, torn_down)
    }

    #[test]
    fn test_success_releases_connection() {
        let (pool, _, _) = setup(&["a"]);
        let coordinator = RequestCoordinator::default();

        let result = coordinator.perform(&pool, |conn| Ok(conn.serial)).unwrap();
        assert_eq!(result, 0);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.on_loan_count(), 0);
    }

    #[test]
    fn test_retries_on_next_node() {
        let (pool, _, torn_down) = setup(&["a", "b"]);
        let coordinator = RequestCoordinator::new(2);
        let mut visited = Vec::new();

        let host = coordinator
            .perform(&pool, |conn| {
                visited.push(conn.node().id().host.clone());
                if conn.node().id().host == "a" {
                    Err(ClientError::ConnectionClosed)
                } else {
                    Ok(conn.node().id().host.clone())
                }
            })
            .unwrap();

        assert_eq!(host, "b");
        assert_eq!(visited, vec!["a", "b"]);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_network_failure_penalizes_node() {
        let nodes = cluster(&["a", "b"]);
        let created = Arc::new(AtomicUsize::new(0));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let pool = fake_pool(nodes.clone(), created, torn_down);

        RequestCoordinator::new(1)
            .perform(&pool, |conn| {
                if conn.node().id().host == "a" {
                    Err(ClientError::Timeout)
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert!(nodes[0].score().read() > 0.9);
        assert_eq!(nodes[1].score().read(), 0.0);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let (pool, created, torn_down) = setup(&["a", "b", "c"]);
        let coordinator = RequestCoordinator::new(2);
        let mut calls = 0;

        let result: Result<(), _> = coordinator.perform(&pool, |_| {
            calls += 1;
            Err(ClientError::ConnectionClosed)
        });

        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(calls, 3);
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(torn_down.load(Ordering::SeqCst), 3);
        assert_eq!(pool.on_loan_count(), 0);
    }

    #[test]
    fn test_zero_retries_makes_one_attempt() {
        let (pool, _, _) = setup(&["a", "b"]);
        let mut calls = 0;

        let result: Result<(), _> = RequestCoordinator::new(0).perform(&pool, |_| {
            calls += 1;
            Err(ClientError::Timeout)
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_protocol_error_not_retried() {
        let nodes = cluster(&["a", "b"]);
        let created = Arc::new(AtomicUsize::new(0));
        let pool = fake_pool(nodes.clone(), created.clone(), Arc::new(AtomicUsize::new(0)));
        let mut calls = 0;

        let result: Result<(), _> = RequestCoordinator::new(2).perform(&pool, |_| {
            calls += 1;
            Err(ClientError::Server {
                code: ErrorCode::BadRequest,
                message: "bad bucket".to_string(),
            })
        });

        assert!(matches!(result, Err(ClientError::Server { .. })));
        assert_eq!(calls, 1);
        assert_eq!(nodes[0].score().read(), 0.0);
        // The connection itself is fine and goes back to the pool.
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_connect_failure_consumes_attempt_and_excludes_node() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory_attempts = attempts.clone();
        let nodes = cluster(&["down", "up"]);
        let factory_nodes = nodes.clone();
        let pool: Pool<FakeConn> = Pool::new(
            Box::new(move |excluded: &Exclusions| {
                factory_attempts.fetch_add(1, Ordering::SeqCst);
                let node = factory_nodes
                    .iter()
                    .find(|n| !excluded.contains(n.id()))
                    .ok_or(ClientError::NoNodes)?;
                if node.id().host == "down" {
                    return Err(ClientError::Connect {
                        node: node.id().clone(),
                        source: Box::new(ClientError::ConnectionClosed),
                    });
                }
                Ok(FakeConn {
                    node: Arc::clone(node),
                    serial: 0,
                })
            }),
            Box::new(|_| {}),
        );

        let host = RequestCoordinator::new(1)
            .perform(&pool, |conn| Ok(conn.node().id().host.clone()))
            .unwrap();

        assert_eq!(host, "up");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_non_network_connect_failure_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory_attempts = attempts.clone();
        let pool: Pool<FakeConn> = Pool::new(
            Box::new(move |_: &Exclusions| {
                factory_attempts.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Connect {
                    node: NodeId::new("a", 8087),
                    source: Box::new(ClientError::Server {
                        code: ErrorCode::Unauthorized,
                        message: "bad credentials".to_string(),
                    }),
                })
            }),
            Box::new(|_| {}),
        );

        let result: Result<(), _> = RequestCoordinator::new(3).perform(&pool, |_| Ok(()));
        assert!(matches!(result, Err(ClientError::Connect { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

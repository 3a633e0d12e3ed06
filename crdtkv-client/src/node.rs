//! Cluster nodes and health-aware node selection.

use crate::config::ConfigError;
use crate::score::{DecayingScore, DEFAULT_HALF_LIFE};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default score below which a node counts as healthy.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.1;

/// Identity of a node: its host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeId {
    type Err = ConfigError;

    /// Parses `host:port`, or a bare `host` on the default port.
    ///
    /// IPv6 hosts must be bracketed: `[::1]:8087` or `[::1]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::ValidationError(format!("invalid node address '{}'", s));
        let parse_port = |port: &str| {
            port.parse::<u16>().map_err(|_| {
                ConfigError::ValidationError(format!("invalid port in node address '{}'", s))
            })
        };

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            if host.is_empty() {
                return Err(invalid());
            }
            let port = match tail {
                "" => crdtkv_protocol::DEFAULT_PORT,
                _ => parse_port(tail.strip_prefix(':').ok_or_else(invalid)?)?,
            };
            return Ok(Self::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Err(ConfigError::ValidationError(format!(
                "IPv6 node address '{}' must be bracketed, e.g. '[::1]:8087'",
                s
            ))),
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(port)?)),
            None if !s.is_empty() => Ok(Self::new(s, crdtkv_protocol::DEFAULT_PORT)),
            _ => Err(invalid()),
        }
    }
}

/// A cluster node and its recent error history.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    score: DecayingScore,
}

impl Node {
    pub fn new(id: NodeId, half_life: Duration) -> Self {
        Self {
            id,
            score: DecayingScore::with_half_life(half_life),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn score(&self) -> &DecayingScore {
        &self.score
    }

    /// Records one transport failure against this node.
    pub fn record_failure(&self) {
        self.score.add(1.0);
        tracing::warn!(
            "Node {} failed (error score now {:.3})",
            self.id,
            self.score.read()
        );
    }

    /// Returns whether the node's error score is below `threshold`.
    pub fn is_healthy(&self, threshold: f64) -> bool {
        self.score.read() < threshold
    }
}

/// Nodes to avoid for the remainder of one request.
#[derive(Debug, Clone, Default)]
pub struct Exclusions(HashSet<NodeId>);

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId) -> bool {
        self.0.insert(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Tuning for node selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    /// Nodes scoring at or above this are avoided while healthier ones exist.
    pub error_threshold: f64,
    /// Half-life of a node's error score.
    pub half_life: Duration,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            half_life: DEFAULT_HALF_LIFE,
        }
    }
}

/// Picks a node for a new connection.
///
/// Excluded nodes are skipped unless every node is excluded. Among the
/// remaining candidates a healthy node is chosen uniformly at random; if none
/// is healthy the least-failing node is used rather than failing outright.
/// Returns `None` only when `nodes` is empty.
pub fn choose_node<R: Rng + ?Sized>(
    nodes: &[Arc<Node>],
    excluded: &Exclusions,
    policy: &SelectionPolicy,
    rng: &mut R,
) -> Option<Arc<Node>> {
    let scored = |node: &Arc<Node>| (Arc::clone(node), node.score().read());

    let mut candidates: Vec<(Arc<Node>, f64)> = nodes
        .iter()
        .filter(|node| !excluded.contains(node.id()))
        .map(scored)
        .collect();
    if candidates.is_empty() {
        candidates = nodes.iter().map(scored).collect();
    }

    let healthy: Vec<&Arc<Node>> = candidates
        .iter()
        .filter(|(_, score)| *score < policy.error_threshold)
        .map(|(node, _)| node)
        .collect();
    if let Some(node) = healthy.choose(rng) {
        return Some(Arc::clone(node));
    }

    candidates
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(node, _)| node)
}

use crate::catalog::split_address;
use crate::planner::{Message, PartialResult};

use anyhow::Result;
use async_trait::async_trait;

/// Outcome of handing something to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Peer unreachable; stored on disk and replayed later.
    Buffered,
}

/// Outbound link to other nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a task message to the node owning `destination`.
    async fn send_message(&self, destination: &str, message: &Message) -> Result<Delivery>;

    /// Sends a partial result to the session on node `destination`.
    async fn send_result(&self, destination: &str, result: &PartialResult) -> Result<Delivery>;
}

/// `host:port` a node or address is served from (`h1:10031/droonga.000` -> `h1:10031`).
pub fn peer_of(destination: &str) -> &str {
    let node = split_address(destination).0;
    match node.find('/') {
        Some(slash) => &node[..slash],
        None => node,
    }
}

/// Whether `destination` is served by `local_node` (`host:port/tag`).
pub fn is_local(destination: &str, local_node: &str) -> bool {
    split_address(destination).0 == local_node
}


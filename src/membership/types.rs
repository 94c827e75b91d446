use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a process hosts partitions (`Member`) or only routes to them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeRole {
    Member,
    Client,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl NodeState {
    /// Alive and Suspect members keep their partitions; only a confirmed
    /// failure or a graceful leave removes a member from the view.
    pub fn is_live(self) -> bool {
        matches!(self, NodeState::Alive | NodeState::Suspect)
    }
}

/// Represents a single member in the cluster.
///
/// The `incarnation` field is a logical clock used to order updates and
/// resolve conflicts (e.g., refuting a false "Suspect" claim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub role: NodeRole,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// Every gossip datagram: who sent it, which view the sender was on, and
/// the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: NodeId,
    pub view_version: u64,
    pub payload: GossipPayload,
}

/// The wire protocol for inter-node communication.
///
/// - `Join/JoinAck`: handshake of a new node with a seed.
/// - `Ping/Ack`: periodic heartbeat; the ack carries the full member list.
/// - `Suspect/Alive`: dissemination of health changes.
/// - `Leave`: graceful departure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipPayload {
    Join { node: Node },

    JoinAck { members: Vec<Node> },

    Ping { incarnation: u64 },

    Ack { incarnation: u64, members: Vec<Node> },

    Suspect { node_id: NodeId, incarnation: u64 },

    Alive { node_id: NodeId, incarnation: u64 },

    Leave { node_id: NodeId },
}

impl GossipPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipPayload::Join { .. } => "join",
            GossipPayload::JoinAck { .. } => "join_ack",
            GossipPayload::Ping { .. } => "ping",
            GossipPayload::Ack { .. } => "ack",
            GossipPayload::Suspect { .. } => "suspect",
            GossipPayload::Alive { .. } => "alive",
            GossipPayload::Leave { .. } => "leave",
        }
    }
}

//! Membership & Discovery Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) to manage the cluster topology.
//! Nodes use this service to discover each other, detect failures, and publish versioned
//! cluster views that the partitioned map routes through.
//!
//! ## Core Mechanisms
//! - **Join Handshake**: A new member sends `Join` to its seeds and waits (bounded) for a `JoinAck`.
//! - **Gossip Protocol**: Nodes periodically ping a peer via UDP; the ack carries the member list.
//! - **Failure Detection**: "Suspect" -> "Dead" transitions driven by timeouts.
//! - **Incarnation Numbers**: Resolve disputes about a node's state (Alive/Suspect).
//! - **Views**: Immutable `ClusterView` snapshots (members + partition table) swapped through
//!   a `watch` channel whenever the live set changes.
//! - **Client Gateway**: Processes that host no data pull the view over HTTP instead of gossiping.

pub mod client;
pub mod handlers;
pub mod service;
pub mod types;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

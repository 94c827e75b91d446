//! Clustered HTTP Session Grid Library
//!
//! This library crate defines the modules that make up a replicated, partitioned
//! in-memory session store shared by stateless web-server processes.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip protocol
//!   (SWIM-like) for node discovery and failure detection, and publishes versioned cluster
//!   views. Data-less processes use the HTTP client gateway instead.
//! - **`storage`**: The distributed state layer. A sharded, replicated key-value map
//!   (`PartitionedMap`) that routes every operation to the partition owner.
//! - **`index`**: Secondary indexes (hash or sorted) kept inside each partition.
//! - **`session`**: Session lifecycle, flush and save modes, and the `SessionStore` trait
//!   an HTTP adapter consumes.
//! - **`eviction`**: Background removal of idle sessions.
//! - **`node`**: Wires the above together for one process.

pub mod config;
pub mod error;
pub mod eviction;
pub mod index;
pub mod membership;
pub mod node;
pub mod session;
pub mod storage;
pub mod transport;

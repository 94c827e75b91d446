//! Distributed Storage Module
//!
//! Implements a sharded, replicated in-memory key-value store with co-located indexes.
//!
//! ## Core Concepts
//! - **Partitioning**: Keys are hashed (FNV-1a) into a fixed number of partitions.
//! - **Placement**: The cluster view assigns every partition one owner plus backups.
//! - **Concurrency**: One mutex per partition covers its entries and indexes.
//! - **Replication**: The owner applies each write and pushes it to its backups.
//! - **Recovery**: On view changes backups are promoted, new owners pull the partition
//!   from a surviving replica and old owners hand their copy over.
//! - **Access**: `PartitionedMap` acts as a smart client, routing to the owner (local or remote).

pub mod handlers;
pub mod map;
pub mod partitioner;
pub mod protocol;
pub mod store;
pub mod types;

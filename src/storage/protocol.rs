//! Storage Network Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) used for
//! internode communication (forwarded operations, replication, partition
//! transfer, index queries).
//!
//! Every route lives under `/internal/maps/{map_name}` so several maps can
//! share one node. Bodies are JSON.

use super::types::{Attributes, Entry, EntryProcessor, EntrySeed};
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Operation forwarded by a non-owner to the partition owner.
pub const ENDPOINT_OP: &str = "/op";
/// Owner to backup synchronisation.
pub const ENDPOINT_REPLICATE: &str = "/replicate";
/// Partition transfer: GET dumps a partition, POST merges one (handoff).
pub const ENDPOINT_PARTITION: &str = "/partition";
/// Index query answered for the partitions the member owns.
pub const ENDPOINT_QUERY: &str = "/query";

pub fn map_base_path(map_name: &str) -> String {
    format!("/internal/maps/{}", map_name)
}

// --- Data Transfer Objects ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapOperation {
    Get {
        key: String,
    },
    Put {
        key: String,
        attributes: Attributes,
        max_idle_ms: u64,
    },
    PutIfAbsent {
        key: String,
        seed: EntrySeed,
    },
    Remove {
        key: String,
    },
    Compute {
        key: String,
        processor: EntryProcessor,
    },
}

impl MapOperation {
    pub fn key(&self) -> &str {
        match self {
            MapOperation::Get { key }
            | MapOperation::Put { key, .. }
            | MapOperation::PutIfAbsent { key, .. }
            | MapOperation::Remove { key }
            | MapOperation::Compute { key, .. } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MapOperation::Get { .. } => "get",
            MapOperation::Put { .. } => "put",
            MapOperation::PutIfAbsent { .. } => "put_if_absent",
            MapOperation::Remove { .. } => "remove",
            MapOperation::Compute { .. } => "compute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OpResult {
    Entry(Option<Entry>),
    Version(u64),
    Removed(bool),
}

/// Request used when a node receives an operation for a key it doesn't own.
///
/// Carries the `op_id` so a retried forward that already reached the owner
/// is answered from the owner's dedup cache instead of applied twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub partition: u32,
    pub op_id: String,
    pub op: MapOperation,
}

/// A change the owner pushes to its backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicaWrite {
    Upsert { entry: Entry },
    /// Carries the sequence of the removed entry; a backup holding a newer
    /// copy ignores it.
    Remove { key: String, sequence: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub partition: u32,
    pub write: ReplicaWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub applied: bool,
}

/// Complete contents of one partition, used for recovery and handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDump {
    pub partition: u32,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResponse {
    pub merged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub keys: Vec<String>,
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute name to encoded value.
pub type Attributes = BTreeMap<String, Vec<u8>>;

/// One stored value. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub attributes: Attributes,
    /// Content version, bumped when attributes or the idle limit change.
    /// Access-time updates leave it alone.
    pub version: u64,
    /// Partition-wide mutation counter, bumped by every write including
    /// touches. Replicas keep whichever copy has the higher sequence.
    pub sequence: u64,
    pub created_at: u64,
    pub last_accessed: u64,
    /// Zero disables expiry.
    pub max_idle_ms: u64,
}

impl Entry {
    /// Last instant at which the entry is still live; `None` if it never
    /// expires.
    pub fn expire_at(&self) -> Option<u64> {
        (self.max_idle_ms > 0).then(|| self.last_accessed.saturating_add(self.max_idle_ms))
    }

    /// Idle strictly longer than `max_idle_ms`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_at().is_some_and(|deadline| now > deadline)
    }
}

/// Initial state of an entry created through put-if-absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySeed {
    pub attributes: Attributes,
    pub created_at: u64,
    pub last_accessed: u64,
    pub max_idle_ms: u64,
}

/// A partial write applied atomically to one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub set: Attributes,
    pub removed: Vec<String>,
    pub last_accessed: Option<u64>,
    pub max_idle_ms: Option<u64>,
    /// When present, the write only applies if the stored version matches.
    pub expected_version: Option<u64>,
}

impl EntryUpdate {
    pub fn changes_content(&self) -> bool {
        !self.set.is_empty() || !self.removed.is_empty() || self.max_idle_ms.is_some()
    }
}

/// Read-modify-write step executed by the owner under the partition lock.
/// Serializable so it can travel to a remote owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryProcessor {
    /// Records an access. An entry already expired at `now` is removed
    /// and the result is `None`.
    Touch { now: u64 },
    Update(EntryUpdate),
    /// Removes the entry if it is still expired at `now`; a concurrent
    /// touch wins.
    Evict { now: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// The owner waits for every backup before answering.
    Sync,
    /// Backups are updated in the background.
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStatus {
    Active,
    /// Data is being recovered; operations are refused with `Unavailable`.
    Migrating,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

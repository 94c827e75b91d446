//! Local partition storage.
//!
//! One mutex per partition guards its entries, its indexes and its status
//! together. Nothing here does I/O; callers must release the guard before
//! awaiting anything.

use super::protocol::ReplicaWrite;
use super::types::{Attributes, Entry, EntryProcessor, EntrySeed, PartitionStatus};
use crate::error::{GridError, Result};
use crate::index::engine::IndexEngine;
use crate::index::types::{IndexDefinition, IndexQuery};

use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Outcome of one write under the partition lock.
#[derive(Debug, Default)]
pub struct Applied {
    /// The entry after the write; for removals, the removed entry.
    pub value: Option<Entry>,
    /// What the backups must apply.
    pub replica: Option<ReplicaWrite>,
    /// Set when the write found the entry idle past its limit and removed it.
    pub expired: Option<Entry>,
}

pub struct PartitionData {
    entries: HashMap<String, Entry>,
    index: IndexEngine,
    status: PartitionStatus,
    last_sequence: u64,
    /// Sequence of the last removal per key, so a late upsert cannot bring
    /// a removed entry back.
    tombstones: HashMap<String, (u64, Instant)>,
    release_marked_at: Option<Instant>,
}

impl PartitionData {
    fn new(definitions: &[IndexDefinition]) -> Self {
        Self {
            entries: HashMap::new(),
            index: IndexEngine::new(definitions),
            status: PartitionStatus::Active,
            last_sequence: 0,
            tombstones: HashMap::new(),
            release_marked_at: None,
        }
    }

    pub fn status(&self) -> PartitionStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    fn observe_sequence(&mut self, sequence: u64) {
        self.last_sequence = self.last_sequence.max(sequence);
    }

    fn store(&mut self, entry: Entry) {
        self.tombstones.remove(&entry.key);
        let old = self.entries.insert(entry.key.clone(), entry.clone());
        self.index.on_entry_changed(&entry.key, old.as_ref(), Some(&entry));
    }

    fn delete(&mut self, key: &str) -> Option<Entry> {
        let old = self.entries.remove(key)?;
        self.index.on_entry_changed(key, Some(&old), None);
        Some(old)
    }

    fn bury(&mut self, key: &str, sequence: u64) {
        let slot = self
            .tombstones
            .entry(key.to_string())
            .or_insert((sequence, Instant::now()));
        if slot.0 < sequence {
            *slot = (sequence, Instant::now());
        }
    }

    /// Removes `key` under a fresh sequence and records its tombstone.
    fn remove_sequenced(&mut self, key: &str) -> Option<(Entry, ReplicaWrite)> {
        let old = self.delete(key)?;
        let sequence = self.next_sequence();
        self.bury(key, sequence);
        Some((
            old,
            ReplicaWrite::Remove {
                key: key.to_string(),
                sequence,
            },
        ))
    }

    fn upserted(&self, entry: Entry) -> Applied {
        Applied {
            value: Some(entry.clone()),
            replica: Some(ReplicaWrite::Upsert { entry }),
            expired: None,
        }
    }

    fn expire(&mut self, key: &str) -> Applied {
        match self.remove_sequenced(key) {
            Some((old, replica)) => {
                tracing::debug!("Entry {} expired (idle since {})", key, old.last_accessed);
                Applied {
                    value: None,
                    replica: Some(replica),
                    expired: Some(old),
                }
            }
            None => Applied::default(),
        }
    }

    /// Live entry for `key`; an expired entry reads as absent.
    pub fn get(&self, key: &str, now: u64) -> Option<Entry> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .cloned()
    }

    pub fn put(&mut self, key: &str, attributes: Attributes, max_idle_ms: u64, now: u64) -> Applied {
        let sequence = self.next_sequence();
        let (version, created_at) = match self.entries.get(key) {
            Some(old) => (old.version + 1, old.created_at),
            None => (1, now),
        };

        let entry = Entry {
            key: key.to_string(),
            attributes,
            version,
            sequence,
            created_at,
            last_accessed: now,
            max_idle_ms,
        };
        self.store(entry.clone());
        self.upserted(entry)
    }

    pub fn put_if_absent(&mut self, key: &str, seed: EntrySeed) -> Result<Applied> {
        if self.entries.contains_key(key) {
            return Err(GridError::AlreadyExists(key.to_string()));
        }

        let entry = Entry {
            key: key.to_string(),
            attributes: seed.attributes,
            version: 1,
            sequence: self.next_sequence(),
            created_at: seed.created_at,
            last_accessed: seed.last_accessed,
            max_idle_ms: seed.max_idle_ms,
        };
        self.store(entry.clone());
        Ok(self.upserted(entry))
    }

    pub fn remove(&mut self, key: &str) -> Applied {
        match self.remove_sequenced(key) {
            Some((old, replica)) => Applied {
                replica: Some(replica),
                value: Some(old),
                expired: None,
            },
            None => Applied::default(),
        }
    }

    /// Runs `processor` against the entry for `key`, if present.
    pub fn process(&mut self, key: &str, processor: EntryProcessor, now: u64) -> Result<Applied> {
        let Some(current) = self.entries.get(key).cloned() else {
            return Ok(Applied::default());
        };

        match processor {
            EntryProcessor::Touch { now: touched_at } => {
                if current.is_expired(touched_at) {
                    return Ok(self.expire(key));
                }
                let mut entry = current;
                entry.last_accessed = entry.last_accessed.max(touched_at);
                entry.sequence = self.next_sequence();
                self.store(entry.clone());
                Ok(self.upserted(entry))
            }

            EntryProcessor::Evict { now: checked_at } => {
                if current.is_expired(checked_at) {
                    Ok(self.expire(key))
                } else {
                    Ok(Applied {
                        value: Some(current),
                        ..Applied::default()
                    })
                }
            }

            EntryProcessor::Update(update) => {
                if current.is_expired(now) {
                    return Ok(self.expire(key));
                }
                if let Some(expected) = update.expected_version
                    && expected != current.version
                {
                    return Err(GridError::VersionConflict {
                        key: key.to_string(),
                        expected,
                        actual: current.version,
                    });
                }

                let bumps_version = update.changes_content();
                let mut entry = current;
                for name in &update.removed {
                    entry.attributes.remove(name);
                }
                entry.attributes.extend(update.set);
                if let Some(accessed) = update.last_accessed {
                    entry.last_accessed = entry.last_accessed.max(accessed);
                }
                if let Some(max_idle_ms) = update.max_idle_ms {
                    entry.max_idle_ms = max_idle_ms;
                }
                if bumps_version {
                    entry.version += 1;
                }
                entry.sequence = self.next_sequence();
                self.store(entry.clone());
                Ok(self.upserted(entry))
            }
        }
    }

    /// In-process read-modify-write: `f` receives the current entry and
    /// returns its replacement, or `None` to remove it.
    pub fn compute_with<F>(&mut self, key: &str, f: F, now: u64) -> Applied
    where
        F: FnOnce(Entry) -> Option<Entry>,
    {
        let Some(current) = self.entries.get(key).cloned() else {
            return Applied::default();
        };
        if current.is_expired(now) {
            return self.expire(key);
        }

        match f(current.clone()) {
            Some(mut entry) => {
                entry.key = current.key.clone();
                let changed = entry.attributes != current.attributes
                    || entry.max_idle_ms != current.max_idle_ms;
                entry.version = if changed {
                    current.version + 1
                } else {
                    current.version
                };
                entry.sequence = self.next_sequence();
                self.store(entry.clone());
                self.upserted(entry)
            }
            None => self.remove(key),
        }
    }

    /// Applies a write pushed by the owner. Returns false when the local
    /// copy, or the removal of the key, is already newer.
    pub fn apply_replica(&mut self, write: ReplicaWrite) -> bool {
        match write {
            ReplicaWrite::Upsert { entry } => {
                self.observe_sequence(entry.sequence);
                if let Some(local) = self.entries.get(&entry.key)
                    && local.sequence >= entry.sequence
                {
                    return false;
                }
                if let Some((removed_at, _)) = self.tombstones.get(&entry.key)
                    && *removed_at >= entry.sequence
                {
                    return false;
                }
                self.store(entry);
                true
            }
            ReplicaWrite::Remove { key, sequence } => {
                self.observe_sequence(sequence);
                self.bury(&key, sequence);
                match self.entries.get(&key) {
                    Some(local) if local.sequence <= sequence => {
                        self.delete(&key);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Merges a transferred partition, keeping the newer copy of each key.
    pub fn merge(&mut self, entries: Vec<Entry>) -> usize {
        let mut merged = 0;
        for entry in entries {
            if self.apply_replica(ReplicaWrite::Upsert { entry }) {
                merged += 1;
            }
        }
        merged
    }

    pub fn dump(&self) -> Vec<Entry> {
        self.entries.values().cloned().collect()
    }

    pub fn expired_keys(&self, now: u64) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Keys matching `query`, excluding entries already idle past their limit.
    pub fn query(&self, query: &IndexQuery, now: u64) -> Result<HashSet<String>> {
        let keys = self.index.execute(query)?;
        Ok(keys
            .into_iter()
            .filter(|key| {
                self.entries
                    .get(key)
                    .is_some_and(|entry| !entry.is_expired(now))
            })
            .collect())
    }

    /// Forgets tombstones recorded more than `retention` ago.
    fn prune_tombstones(&mut self, retention: Duration) {
        self.tombstones
            .retain(|_, (_, removed_at)| removed_at.elapsed() < retention);
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.tombstones.clear();
        self.index.clear();
    }
}

/// All partitions this process may hold.
pub struct PartitionStore {
    partitions: Vec<Mutex<PartitionData>>,
}

impl PartitionStore {
    pub fn new(partition_count: u32, definitions: &[IndexDefinition]) -> Self {
        let partitions = (0..partition_count)
            .map(|_| Mutex::new(PartitionData::new(definitions)))
            .collect();
        Self { partitions }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn lock(&self, partition: u32) -> Result<MutexGuard<'_, PartitionData>> {
        self.partitions
            .get(partition as usize)
            .map(|slot| slot.lock())
            .ok_or_else(|| GridError::Internal(format!("partition {} out of range", partition)))
    }

    /// Like `lock`, but refuses partitions that are still recovering.
    pub fn lock_active(&self, partition: u32) -> Result<MutexGuard<'_, PartitionData>> {
        let data = self.lock(partition)?;
        if data.status == PartitionStatus::Migrating {
            return Err(GridError::Unavailable {
                partition,
                reason: "partition is migrating".to_string(),
            });
        }
        Ok(data)
    }

    pub fn set_status(&self, partition: u32, status: PartitionStatus) -> Result<()> {
        self.lock(partition)?.status = status;
        Ok(())
    }

    /// Schedules the local copy for release unless it is already scheduled.
    pub fn mark_for_release(&self, partition: u32) -> Result<()> {
        let mut data = self.lock(partition)?;
        if data.release_marked_at.is_none() && !data.is_empty() {
            data.release_marked_at = Some(Instant::now());
        }
        Ok(())
    }

    pub fn retain(&self, partition: u32) -> Result<()> {
        self.lock(partition)?.release_marked_at = None;
        Ok(())
    }

    /// Drops partitions marked for release longer than `grace` ago, and
    /// tombstones older than `grace` everywhere.
    pub fn release_due(&self, grace: Duration) -> Vec<u32> {
        let mut released = Vec::new();
        for (partition, slot) in self.partitions.iter().enumerate() {
            let mut data = slot.lock();
            data.prune_tombstones(grace);
            if let Some(marked_at) = data.release_marked_at
                && marked_at.elapsed() >= grace
            {
                data.clear();
                data.release_marked_at = None;
                released.push(partition as u32);
            }
        }
        released
    }

    pub fn entry_count(&self) -> usize {
        self.partitions.iter().map(|slot| slot.lock().len()).sum()
    }

    /// Partitions holding at least one entry.
    pub fn held_partitions(&self) -> usize {
        self.partitions
            .iter()
            .filter(|slot| !slot.lock().is_empty())
            .count()
    }
}

//! Idle-session sweeper.
//!
//! Every tick scans the partitions this member owns for entries idle past
//! their limit and removes each one with an `Evict` processor, which checks
//! the timestamp again under the partition lock. The owner's map publishes
//! the removal, which the session repository turns into
//! `SessionEvent::Expired`.

use crate::config::EvictionConfig;
use crate::storage::map::PartitionedMap;
use crate::storage::types::{EntryProcessor, now_ms};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys the scan found idle.
    pub candidates: usize,
    pub evicted: usize,
    /// Touched again between the scan and the eviction.
    pub survived: usize,
    pub failed: usize,
    pub released_partitions: usize,
}

pub struct EvictionScheduler {
    map: Arc<PartitionedMap>,
    interval: Duration,
    release_grace: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionScheduler {
    pub fn new(map: Arc<PartitionedMap>, config: &EvictionConfig) -> Arc<Self> {
        Arc::new(Self {
            map,
            interval: config.interval(),
            release_grace: Duration::from_millis(config.release_grace_ms),
            task: Mutex::new(None),
        })
    }

    /// Spawns the periodic sweep and returns immediately.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            scheduler.sweep_loop().await;
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        tracing::info!("Eviction scheduler started (every {:?})", self.interval);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    async fn sweep_loop(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = self.run_once(now_ms()).await;
            if report.candidates > 0 || report.released_partitions > 0 {
                tracing::info!(
                    "Eviction sweep: {} evicted, {} survived, {} failed, {} partitions released",
                    report.evicted,
                    report.survived,
                    report.failed,
                    report.released_partitions
                );
            }
        }
    }

    /// One sweep over the partitions owned at `now`. Failures are logged
    /// and counted; they never stop the sweep.
    pub async fn run_once(&self, now: u64) -> SweepReport {
        let candidates = self.map.expired_keys_owned(now);
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for key in candidates {
            match self
                .map
                .compute_if_present(&key, EntryProcessor::Evict { now })
                .await
            {
                Ok(None) => {
                    tracing::debug!("Evicted idle entry {}", key);
                    report.evicted += 1;
                }
                Ok(Some(_)) => {
                    tracing::debug!("Entry {} was touched before eviction", key);
                    report.survived += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to evict {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        report.released_partitions = self.map.release_stale_partitions(self.release_grace).len();
        report
    }
}

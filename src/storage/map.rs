use super::partitioner::PartitionManager;
use super::protocol::*;
use super::store::{Applied, PartitionStore};
use super::types::{Attributes, Entry, EntryProcessor, EntrySeed, PartitionStatus, ReplicationMode, now_ms};
use crate::config::StorageConfig;
use crate::error::{GridError, Result};
use crate::index::types::{IndexDefinition, IndexQuery};
use crate::membership::types::{Node, NodeId};
use crate::membership::view::{ClusterTopology, ClusterView, PartitionTable};
use crate::transport::PeerClient;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

const PROCESSED_OPS_LIMIT: usize = 10_000;
const EXPIRY_CHANNEL_CAPACITY: usize = 1_024;

/// Key/value map sharded over the data members of the cluster.
///
/// Acts as a smart client: every operation is resolved to the partition
/// owner in the current view and executed locally or forwarded over HTTP.
/// When this process hosts data it is also the server side of those calls.
pub struct PartitionedMap {
    name: String,
    base_path: String,
    topology: Arc<dyn ClusterTopology>,
    partitioner: PartitionManager,
    store: PartitionStore,
    config: StorageConfig,
    /// Retries transport failures; used for replication and transfers.
    peer: PeerClient,
    /// Single attempt; the routing loop retries against a fresh view.
    router: PeerClient,
    processed_ops: DashMap<String, OpResult>,
    /// Last view whose ownership changes have been applied locally.
    applied_view: AtomicU64,
    expired_tx: broadcast::Sender<Entry>,
    view_task: Mutex<Option<JoinHandle<()>>>,
}

impl PartitionedMap {
    pub fn new(
        topology: Arc<dyn ClusterTopology>,
        config: &StorageConfig,
        partition_count: u32,
        indexes: &[IndexDefinition],
    ) -> Arc<Self> {
        let (expired_tx, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);

        Arc::new(Self {
            name: config.map_name.clone(),
            base_path: map_base_path(&config.map_name),
            topology,
            partitioner: PartitionManager::new(partition_count),
            store: PartitionStore::new(partition_count, indexes),
            peer: PeerClient::new(
                config.request_timeout(),
                config.max_attempts,
                config.retry_backoff_ms,
            ),
            router: PeerClient::new(config.request_timeout(), 1, config.retry_backoff_ms),
            config: config.clone(),
            processed_ops: DashMap::new(),
            applied_view: AtomicU64::new(0),
            expired_tx,
            view_task: Mutex::new(None),
        })
    }

    /// Applies the current view, then keeps following view changes in the
    /// background. Data-less processes have nothing to recover and skip
    /// this.
    pub async fn start(self: &Arc<Self>) {
        if !self.topology.hosts_data() {
            return;
        }

        let current = self.topology.current_view();
        let previous = if current.version > 0 {
            self.apply_view(None, &current).await;
            Some(current)
        } else {
            None
        };

        let map = self.clone();
        let handle = tokio::spawn(async move {
            map.view_loop(previous).await;
        });
        *self.view_task.lock() = Some(handle);

        tracing::info!("Map '{}' following cluster views", self.name);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.view_task.lock().take() {
            handle.abort();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn partition_of(&self, key: &str) -> u32 {
        self.partitioner.get_partition(key)
    }

    pub fn local_node_id(&self) -> NodeId {
        self.topology.local_id().clone()
    }

    pub fn current_view(&self) -> Arc<ClusterView> {
        self.topology.current_view()
    }

    /// Entries removed because they sat idle past their limit, as observed
    /// by this process when it owned them.
    pub fn subscribe_expirations(&self) -> broadcast::Receiver<Entry> {
        self.expired_tx.subscribe()
    }

    pub fn applied_view_version(&self) -> u64 {
        self.applied_view.load(Ordering::SeqCst)
    }

    pub fn local_partition_count(&self) -> usize {
        self.store.held_partitions()
    }

    pub fn local_entry_count(&self) -> usize {
        self.store.entry_count()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &PartitionStore {
        &self.store
    }

    // --- Public operations ---

    /// Stores `attributes` under `key`, replacing any previous value.
    /// Returns the new content version.
    pub async fn put(&self, key: &str, attributes: Attributes, ttl: Duration) -> Result<u64> {
        let op = MapOperation::Put {
            key: key.to_string(),
            attributes,
            max_idle_ms: ttl.as_millis() as u64,
        };
        match self.execute(op).await? {
            OpResult::Version(version) => Ok(version),
            other => Err(unexpected("put", &other)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let op = MapOperation::Get {
            key: key.to_string(),
        };
        match self.execute(op).await? {
            OpResult::Entry(entry) => Ok(entry),
            other => Err(unexpected("get", &other)),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        let op = MapOperation::Remove {
            key: key.to_string(),
        };
        match self.execute(op).await? {
            OpResult::Removed(removed) => Ok(removed),
            other => Err(unexpected("remove", &other)),
        }
    }

    /// Fails with `AlreadyExists` when `key` is present.
    pub async fn put_if_absent(&self, key: &str, attributes: Attributes, ttl: Duration) -> Result<u64> {
        let now = now_ms();
        self.insert_new(
            key,
            EntrySeed {
                attributes,
                created_at: now,
                last_accessed: now,
                max_idle_ms: ttl.as_millis() as u64,
            },
        )
        .await
    }

    /// Put-if-absent with caller-chosen timestamps.
    pub async fn insert_new(&self, key: &str, seed: EntrySeed) -> Result<u64> {
        let op = MapOperation::PutIfAbsent {
            key: key.to_string(),
            seed,
        };
        match self.execute(op).await? {
            OpResult::Version(version) => Ok(version),
            other => Err(unexpected("put_if_absent", &other)),
        }
    }

    /// Atomic read-modify-write at the owner. Returns the resulting entry,
    /// `None` when the key is absent or the processor removed it.
    pub async fn compute_if_present(
        &self,
        key: &str,
        processor: EntryProcessor,
    ) -> Result<Option<Entry>> {
        let op = MapOperation::Compute {
            key: key.to_string(),
            processor,
        };
        match self.execute(op).await? {
            OpResult::Entry(entry) => Ok(entry),
            other => Err(unexpected("compute", &other)),
        }
    }

    /// In-process variant of `compute_if_present`. Closures cannot travel,
    /// so this only runs on the member that owns the key and answers
    /// `WrongOwner` anywhere else.
    pub async fn compute_if_present_local<F>(&self, key: &str, f: F) -> Result<Option<Entry>>
    where
        F: FnOnce(Entry) -> Option<Entry>,
    {
        let partition = self.partition_of(key);
        let view = self.topology.current_view();
        self.check_owner(partition, &view)?;

        let applied = {
            let mut data = self.store.lock_active(partition)?;
            data.compute_with(key, f, now_ms())
        };

        let value = applied.value.clone();
        self.finish_write(partition, &view, applied).await;
        Ok(value)
    }

    /// Keys matching `query` across the cluster: every data member answers
    /// for the partitions it owns and the answers are merged. A member with
    /// an owned partition still recovering makes the whole query retry.
    pub async fn query(&self, query: &IndexQuery) -> Result<HashSet<String>> {
        let max_attempts = self.config.max_attempts;
        let mut views = self.topology.subscribe();
        let mut delay_ms = self.config.retry_backoff_ms.max(1);

        for attempt in 1..=max_attempts {
            let view = views.borrow_and_update().clone();

            match self.gather(query, &view).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(
                        "Query on '{}' failed (attempt {}): {}",
                        query.attribute,
                        attempt,
                        e
                    );
                    self.topology.request_refresh();
                    let jitter = rand::random::<u64>() % 50;
                    let _ = tokio::time::timeout(
                        Duration::from_millis(delay_ms + jitter),
                        views.changed(),
                    )
                    .await;
                    delay_ms = (delay_ms * 2).min(self.config.retry_backoff_ms.max(1) * 8);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "Query on '{}' gave up after {} attempts: {}",
                        query.attribute,
                        attempt,
                        e
                    );
                    return Err(e);
                }
                other => return other,
            }
        }

        Err(GridError::Timeout(format!(
            "query on '{}' exhausted its attempts",
            query.attribute
        )))
    }

    async fn gather(&self, query: &IndexQuery, view: &ClusterView) -> Result<HashSet<String>> {
        let me = self.topology.local_id();
        let mut keys = HashSet::new();

        for member in &view.members {
            if &member.id == me {
                keys.extend(self.query_local(query)?);
                continue;
            }

            let url = self.member_url(member, ENDPOINT_QUERY);
            let response: QueryResponse = self.router.post(url, query).await?;
            tracing::debug!(
                "Query on '{}' returned {} keys from {:?}",
                query.attribute,
                response.keys.len(),
                member.id
            );
            keys.extend(response.keys);
        }

        Ok(keys)
    }

    /// Answers `query` for the partitions this member owns. Fails with
    /// `Unavailable` while any of them is still recovering.
    pub fn query_local(&self, query: &IndexQuery) -> Result<HashSet<String>> {
        let view = self.topology.current_view();
        let now = now_ms();
        let mut keys = HashSet::new();

        for partition in view.partitions.partitions_owned_by(self.topology.local_id()) {
            self.check_owner(partition, &view)?;
            let data = self.store.lock_active(partition)?;
            keys.extend(data.query(query, now)?);
        }

        Ok(keys)
    }

    /// Keys in partitions this member owns that are idle past their limit
    /// at `now`.
    pub fn expired_keys_owned(&self, now: u64) -> Vec<String> {
        let view = self.topology.current_view();
        let mut keys = Vec::new();

        for partition in view.partitions.partitions_owned_by(self.topology.local_id()) {
            match self.store.lock(partition) {
                Ok(data) if data.status() == PartitionStatus::Active => {
                    keys.extend(data.expired_keys(now));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping partition {}: {}", partition, e),
            }
        }

        keys
    }

    /// Drops local copies of partitions this member stopped replicating
    /// more than `grace` ago.
    pub fn release_stale_partitions(&self, grace: Duration) -> Vec<u32> {
        let released = self.store.release_due(grace);
        if !released.is_empty() {
            tracing::info!("Released {} partition(s): {:?}", released.len(), released);
        }
        released
    }

    // --- Routing ---

    async fn execute(&self, op: MapOperation) -> Result<OpResult> {
        let partition = self.partition_of(op.key());
        let op_id = Uuid::new_v4().to_string();
        let max_attempts = self.config.max_attempts;
        let mut views = self.topology.subscribe();
        let mut delay_ms = self.config.retry_backoff_ms.max(1);

        for attempt in 1..=max_attempts {
            let view = views.borrow_and_update().clone();

            let result = match view.owner_of(partition) {
                None => Err(GridError::Unavailable {
                    partition,
                    reason: "no owner in the current view".to_string(),
                }),
                Some(owner) if &owner.id == self.topology.local_id() => {
                    self.execute_as_owner(partition, &op_id, op.clone()).await
                }
                Some(owner) => self.forward(owner, partition, &op_id, &op).await,
            };

            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(
                        "{} on partition {} failed (attempt {}): {}",
                        op.kind(),
                        partition,
                        attempt,
                        e
                    );
                    self.topology.request_refresh();
                    let jitter = rand::random::<u64>() % 50;
                    let _ = tokio::time::timeout(
                        Duration::from_millis(delay_ms + jitter),
                        views.changed(),
                    )
                    .await;
                    delay_ms = (delay_ms * 2).min(self.config.retry_backoff_ms.max(1) * 8);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "{} on partition {} gave up after {} attempts: {}",
                        op.kind(),
                        partition,
                        attempt,
                        e
                    );
                    return Err(surface(partition, e));
                }
                other => return other,
            }
        }

        Err(GridError::Unavailable {
            partition,
            reason: "retry attempts exhausted".to_string(),
        })
    }

    async fn forward(
        &self,
        owner: &Node,
        partition: u32,
        op_id: &str,
        op: &MapOperation,
    ) -> Result<OpResult> {
        tracing::debug!(
            "Forwarding {} for partition {} to {:?}",
            op.kind(),
            partition,
            owner.id
        );

        let request = ForwardRequest {
            partition,
            op_id: op_id.to_string(),
            op: op.clone(),
        };
        self.router
            .post(self.member_url(owner, ENDPOINT_OP), &request)
            .await
    }

    fn check_owner(&self, partition: u32, view: &ClusterView) -> Result<()> {
        if !view.partitions.is_owner(partition, self.topology.local_id()) {
            return Err(GridError::WrongOwner {
                partition,
                view_version: view.version,
            });
        }
        if self.applied_view.load(Ordering::SeqCst) < view.version {
            return Err(GridError::Unavailable {
                partition,
                reason: format!("view {} not applied yet", view.version),
            });
        }
        Ok(())
    }

    fn should_process(&self, op_id: &str) -> Option<OpResult> {
        self.processed_ops.get(op_id).map(|done| done.value().clone())
    }

    fn remember(&self, op_id: &str, result: &OpResult) {
        if self.processed_ops.len() > PROCESSED_OPS_LIMIT {
            self.processed_ops.clear();
        }
        self.processed_ops.insert(op_id.to_string(), result.clone());
    }

    /// Server side of a routed operation. Validates ownership against this
    /// member's own view, applies the operation under the partition lock,
    /// then replicates.
    pub async fn execute_as_owner(
        &self,
        partition: u32,
        op_id: &str,
        op: MapOperation,
    ) -> Result<OpResult> {
        if let Some(done) = self.should_process(op_id) {
            tracing::debug!("Operation {} already applied, replaying result", op_id);
            return Ok(done);
        }

        let view = self.topology.current_view();
        self.check_owner(partition, &view)?;

        let (result, applied) = self.apply_locally(partition, op, now_ms())?;
        if applied.replica.is_some() {
            self.remember(op_id, &result);
        }
        self.finish_write(partition, &view, applied).await;

        Ok(result)
    }

    fn apply_locally(&self, partition: u32, op: MapOperation, now: u64) -> Result<(OpResult, Applied)> {
        let mut data = self.store.lock_active(partition)?;

        let outcome = match op {
            MapOperation::Get { key } => (OpResult::Entry(data.get(&key, now)), Applied::default()),
            MapOperation::Put {
                key,
                attributes,
                max_idle_ms,
            } => {
                let applied = data.put(&key, attributes, max_idle_ms, now);
                let version = applied.value.as_ref().map_or(0, |e| e.version);
                (OpResult::Version(version), applied)
            }
            MapOperation::PutIfAbsent { key, seed } => {
                let applied = data.put_if_absent(&key, seed)?;
                let version = applied.value.as_ref().map_or(0, |e| e.version);
                (OpResult::Version(version), applied)
            }
            MapOperation::Remove { key } => {
                let applied = data.remove(&key);
                (OpResult::Removed(applied.value.is_some()), applied)
            }
            MapOperation::Compute { key, processor } => {
                let applied = data.process(&key, processor, now)?;
                (OpResult::Entry(applied.value.clone()), applied)
            }
        };

        Ok(outcome)
    }

    async fn finish_write(&self, partition: u32, view: &ClusterView, applied: Applied) {
        if let Some(expired) = applied.expired {
            // No receivers is fine.
            let _ = self.expired_tx.send(expired);
        }
        if let Some(write) = applied.replica {
            self.replicate(partition, view, write).await;
        }
    }

    // --- Replication ---

    async fn replicate(&self, partition: u32, view: &ClusterView, write: ReplicaWrite) {
        let backups: Vec<Node> = view
            .partitions
            .backups(partition)
            .iter()
            .filter_map(|id| view.member(id).cloned())
            .collect();
        if backups.is_empty() {
            return;
        }

        let request = ReplicateRequest { partition, write };

        match self.config.replication {
            ReplicationMode::Sync => {
                for backup in backups {
                    let url = self.member_url(&backup, ENDPOINT_REPLICATE);
                    send_replica(&self.peer, url, &request, &backup.id).await;
                }
            }
            ReplicationMode::Async => {
                for backup in backups {
                    let url = self.member_url(&backup, ENDPOINT_REPLICATE);
                    let peer = self.peer.clone();
                    let request = request.clone();
                    tokio::spawn(async move {
                        send_replica(&peer, url, &request, &backup.id).await;
                    });
                }
            }
        }
    }

    /// Backup side of replication.
    pub fn apply_replica(&self, request: ReplicateRequest) -> Result<bool> {
        let applied = self.store.lock(request.partition)?.apply_replica(request.write);
        if applied {
            tracing::debug!("Stored replica for partition {}", request.partition);
        }
        Ok(applied)
    }

    // --- Partition transfer ---

    pub fn dump_partition(&self, partition: u32) -> Result<PartitionDump> {
        let data = self.store.lock_active(partition)?;
        Ok(PartitionDump {
            partition,
            entries: data.dump(),
        })
    }

    pub fn merge_partition(&self, dump: PartitionDump) -> Result<usize> {
        let merged = self.store.lock(dump.partition)?.merge(dump.entries);
        tracing::info!("Merged {} entries into partition {}", merged, dump.partition);
        Ok(merged)
    }

    async fn pull_partition(&self, source: &Node, partition: u32) -> Result<Vec<Entry>> {
        let url = format!("{}/{}", self.member_url(source, ENDPOINT_PARTITION), partition);
        let mut delay_ms = self.config.retry_backoff_ms.max(1);

        for attempt in 1..=self.config.max_attempts {
            match self.peer.get::<PartitionDump>(url.clone()).await {
                Ok(dump) => return Ok(dump.entries),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    tracing::debug!(
                        "Pull of partition {} from {:?} failed (attempt {}): {}",
                        partition,
                        source.id,
                        attempt,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(self.config.retry_backoff_ms.max(1) * 8);
                }
                Err(e) => return Err(e),
            }
        }

        Err(GridError::Unavailable {
            partition,
            reason: "partition pull exhausted its attempts".to_string(),
        })
    }

    // --- View changes ---

    async fn view_loop(self: Arc<Self>, mut previous: Option<Arc<ClusterView>>) {
        let mut views = self.topology.subscribe();

        loop {
            let view = views.borrow_and_update().clone();
            if view.version > 0 && previous.as_ref().is_none_or(|p| p.version != view.version) {
                self.apply_view(previous.as_deref(), &view).await;
                previous = Some(view);
            }

            if views.changed().await.is_err() {
                return;
            }
        }
    }

    /// Brings local partitions in line with `new`: promotes backups,
    /// recovers newly owned partitions, hands off lost ones and schedules
    /// release of partitions no longer replicated here.
    async fn apply_view(self: &Arc<Self>, old: Option<&ClusterView>, new: &ClusterView) {
        let me = self.topology.local_id().clone();
        let partition_count = self.store.partition_count();

        // Ownership before this view. A member that was not part of the
        // previous view (or has none) compares against the table the
        // others would have had without it.
        let baseline = match old {
            Some(old) if old.contains(&me) => old.partitions.clone(),
            _ => {
                let others: Vec<NodeId> = new
                    .member_ids()
                    .into_iter()
                    .filter(|id| id != &me)
                    .collect();
                PartitionTable::compute(
                    &others,
                    partition_count,
                    new.partitions.backup_count(),
                )
            }
        };

        let mut migrations: Vec<(u32, Vec<Node>)> = Vec::new();
        let mut handoffs: Vec<(u32, Node)> = Vec::new();
        let mut fills: Vec<(u32, Node)> = Vec::new();
        let mut promoted = 0usize;

        for partition in 0..partition_count {
            let was_owner = baseline.is_owner(partition, &me);
            let was_backup = baseline.is_backup(partition, &me);
            let now_owner = new.partitions.is_owner(partition, &me);
            let now_backup = new.partitions.is_backup(partition, &me);

            if now_owner && !was_owner {
                if was_backup {
                    promoted += 1;
                } else {
                    let sources: Vec<Node> = baseline
                        .owner(partition)
                        .into_iter()
                        .chain(baseline.backups(partition))
                        .filter(|id| *id != &me)
                        .filter_map(|id| new.member(id).cloned())
                        .collect();
                    if let Err(e) = self.store.set_status(partition, PartitionStatus::Migrating) {
                        tracing::error!("Cannot mark partition {}: {}", partition, e);
                        continue;
                    }
                    migrations.push((partition, sources));
                }
            } else if was_owner && !now_owner {
                if let Some(owner) = new.owner_of(partition) {
                    handoffs.push((partition, owner.clone()));
                }
            } else if now_backup && !was_backup {
                if let Some(owner) = new.owner_of(partition) {
                    fills.push((partition, owner.clone()));
                }
            }

            let keep = now_owner || now_backup;
            let marked = if keep {
                self.store.retain(partition)
            } else {
                self.store.mark_for_release(partition)
            };
            if let Err(e) = marked {
                tracing::warn!("Cannot update retention of partition {}: {}", partition, e);
            }
        }

        self.applied_view.fetch_max(new.version, Ordering::SeqCst);

        tracing::info!(
            "Applied view {}: {} promoted, {} migrating, {} handed off, {} new backups",
            new.version,
            promoted,
            migrations.len(),
            handoffs.len(),
            fills.len()
        );

        for (partition, owner) in handoffs {
            let map = self.clone();
            tokio::spawn(async move {
                map.hand_off(partition, owner).await;
            });
        }

        for (partition, owner) in fills {
            let map = self.clone();
            tokio::spawn(async move {
                map.fill_backup(partition, owner).await;
            });
        }

        for (partition, sources) in migrations {
            self.recover(partition, sources).await;
        }
    }

    async fn recover(&self, partition: u32, sources: Vec<Node>) {
        let mut recovered = sources.is_empty();

        for source in &sources {
            match self.pull_partition(source, partition).await {
                Ok(entries) => {
                    match self.store.lock(partition) {
                        Ok(mut data) => {
                            let merged = data.merge(entries);
                            tracing::info!(
                                "Recovered partition {} from {:?} ({} entries)",
                                partition,
                                source.id,
                                merged
                            );
                        }
                        Err(e) => tracing::error!("Cannot recover partition {}: {}", partition, e),
                    }
                    recovered = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to pull partition {} from {:?}: {}",
                        partition,
                        source.id,
                        e
                    );
                }
            }
        }

        if !recovered {
            tracing::warn!(
                "No replica of partition {} reachable, continuing with local data",
                partition
            );
        }

        if let Err(e) = self.store.set_status(partition, PartitionStatus::Active) {
            tracing::error!("Cannot activate partition {}: {}", partition, e);
        }
    }

    async fn hand_off(&self, partition: u32, owner: Node) {
        let dump = match self.store.lock(partition) {
            Ok(data) => PartitionDump {
                partition,
                entries: data.dump(),
            },
            Err(e) => {
                tracing::error!("Cannot hand off partition {}: {}", partition, e);
                return;
            }
        };
        if dump.entries.is_empty() {
            return;
        }

        let url = format!("{}/{}", self.member_url(&owner, ENDPOINT_PARTITION), partition);
        match self.peer.post::<_, MergeResponse>(url, &dump).await {
            Ok(response) => tracing::info!(
                "Handed off partition {} to {:?} ({} merged)",
                partition,
                owner.id,
                response.merged
            ),
            Err(e) => tracing::warn!(
                "Handoff of partition {} to {:?} failed: {}",
                partition,
                owner.id,
                e
            ),
        }
    }

    async fn fill_backup(&self, partition: u32, owner: Node) {
        match self.pull_partition(&owner, partition).await {
            Ok(entries) => match self.store.lock(partition) {
                Ok(mut data) => {
                    let merged = data.merge(entries);
                    tracing::debug!(
                        "Filled backup of partition {} from {:?} ({} entries)",
                        partition,
                        owner.id,
                        merged
                    );
                }
                Err(e) => tracing::error!("Cannot fill partition {}: {}", partition, e),
            },
            Err(e) => tracing::warn!(
                "Failed to fill backup of partition {} from {:?}: {}",
                partition,
                owner.id,
                e
            ),
        }
    }

    fn member_url(&self, member: &Node, endpoint: &str) -> String {
        format!("http://{}{}{}", member.http_addr, self.base_path, endpoint)
    }
}

async fn send_replica(peer: &PeerClient, url: String, request: &ReplicateRequest, backup: &NodeId) {
    match peer.post::<_, ReplicateResponse>(url, request).await {
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(
                "Replication of partition {} to {:?} failed: {}",
                request.partition,
                backup,
                e
            );
        }
    }
}

/// What a caller sees once the routing loop gives up.
fn surface(partition: u32, err: GridError) -> GridError {
    match err {
        GridError::Timeout(_) | GridError::Unavailable { .. } => err,
        other => GridError::Unavailable {
            partition,
            reason: other.to_string(),
        },
    }
}

fn unexpected(op: &str, result: &OpResult) -> GridError {
    GridError::Internal(format!("unexpected result for {}: {:?}", op, result))
}

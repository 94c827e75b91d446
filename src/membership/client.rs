//! Topology source for processes that host no partitions.
//!
//! A `ClientGateway` never gossips. It pulls the cluster view over HTTP from
//! any member it can reach (known members first, then the configured server
//! list), republishes it through its own `watch` channel and lets the
//! partitioned map route every operation to the owning members.

use super::handlers::ENDPOINT_CLUSTER_VIEW;
use super::types::NodeId;
use super::view::{ClusterTopology, ClusterView};
use crate::config::{MembershipConfig, StorageConfig};
use crate::error::{GridError, Result};
use crate::transport::PeerClient;

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

pub struct ClientGateway {
    local_id: NodeId,
    servers: Vec<SocketAddr>,
    peer: PeerClient,
    view_tx: watch::Sender<Arc<ClusterView>>,
    refresh: Notify,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientGateway {
    /// Fetches a first view from `servers` and starts the periodic refresh.
    /// Fails with `Membership` if no server answers.
    pub async fn connect(
        membership: &MembershipConfig,
        storage: &StorageConfig,
        servers: &[SocketAddr],
    ) -> Result<Arc<Self>> {
        if servers.is_empty() {
            return Err(GridError::Membership("no servers configured".into()));
        }

        let (view_tx, _) = watch::channel(Arc::new(ClusterView::empty(
            membership.partition_count,
            membership.backup_count,
        )));

        let gateway = Arc::new(Self {
            local_id: NodeId::new(),
            servers: servers.to_vec(),
            // Single attempt per server: the candidate list is the retry.
            peer: PeerClient::new(storage.request_timeout(), 1, storage.retry_backoff_ms),
            view_tx,
            refresh: Notify::new(),
            refresh_task: Mutex::new(None),
        });

        gateway.fetch_view().await?;
        tracing::info!(
            "Client {} attached, view has {} members",
            gateway.local_id,
            gateway.current_view().members.len()
        );

        let handle = tokio::spawn(Self::refresh_loop(
            Arc::downgrade(&gateway),
            membership.view_refresh(),
        ));
        *gateway.refresh_task.lock() = Some(handle);

        Ok(gateway)
    }

    async fn refresh_loop(gateway: Weak<Self>, period: Duration) {
        loop {
            let Some(this) = gateway.upgrade() else {
                return;
            };

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = this.refresh.notified() => {
                    tracing::debug!("Refreshing view on request");
                }
            }

            if let Err(e) = this.fetch_view().await {
                tracing::warn!("Failed to refresh cluster view: {}", e);
            }
        }
    }

    /// Asks every candidate in turn for its view and publishes the first
    /// answer.
    pub async fn fetch_view(&self) -> Result<()> {
        let mut candidates: Vec<SocketAddr> = self
            .current_view()
            .members
            .iter()
            .map(|m| m.http_addr)
            .collect();
        for server in &self.servers {
            if !candidates.contains(server) {
                candidates.push(*server);
            }
        }

        for addr in candidates {
            let url = format!("http://{}{}", addr, ENDPOINT_CLUSTER_VIEW);
            match self.peer.get::<ClusterView>(url).await {
                Ok(view) if !view.members.is_empty() => {
                    self.publish(view);
                    return Ok(());
                }
                Ok(_) => tracing::debug!("{} has no view yet", addr),
                Err(e) => tracing::debug!("View fetch from {} failed: {}", addr, e),
            }
        }

        Err(GridError::Membership(format!(
            "no reachable server among {:?}",
            self.servers
        )))
    }

    /// Member versions are local counters, so the gateway stamps its own
    /// version and only publishes when the membership actually differs.
    fn publish(&self, fetched: ClusterView) {
        self.view_tx.send_if_modified(|current| {
            if current.version > 0 && current.same_membership(&fetched) {
                return false;
            }
            tracing::info!(
                "Client view {} -> {}: {} members",
                current.version,
                current.version + 1,
                fetched.members.len()
            );
            *current = Arc::new(ClusterView {
                version: current.version + 1,
                ..fetched
            });
            true
        });
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
    }
}

impl ClusterTopology for ClientGateway {
    fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    fn hosts_data(&self) -> bool {
        false
    }

    fn current_view(&self) -> Arc<ClusterView> {
        self.view_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<ClusterView>> {
        self.view_tx.subscribe()
    }

    fn request_refresh(&self) {
        self.refresh.notify_one();
    }
}

impl Drop for ClientGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

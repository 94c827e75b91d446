//! In-process topology for unit tests: views are published by hand instead
//! of by gossip.

use super::types::{Node, NodeId, NodeRole, NodeState};
use super::view::{ClusterTopology, ClusterView};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

pub fn test_node(id: &str, http_addr: SocketAddr) -> Node {
    Node {
        id: NodeId(id.to_string()),
        gossip_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        http_addr,
        role: NodeRole::Member,
        state: NodeState::Alive,
        incarnation: 1,
        last_seen: None,
    }
}

pub struct ManualTopology {
    local_id: NodeId,
    hosts_data: bool,
    partition_count: u32,
    backup_count: usize,
    view_tx: watch::Sender<Arc<ClusterView>>,
}

impl ManualTopology {
    /// A one-member cluster made of `local`.
    pub fn single(local: Node, partition_count: u32, backup_count: usize) -> Arc<Self> {
        let topology = Self::detached(local.id.clone(), true, partition_count, backup_count);
        topology.publish(vec![local]);
        topology
    }

    /// A topology with no view published yet.
    pub fn detached(
        local_id: NodeId,
        hosts_data: bool,
        partition_count: u32,
        backup_count: usize,
    ) -> Arc<Self> {
        let (view_tx, _) = watch::channel(Arc::new(ClusterView::empty(
            partition_count,
            backup_count,
        )));
        Arc::new(Self {
            local_id,
            hosts_data,
            partition_count,
            backup_count,
            view_tx,
        })
    }

    pub fn publish(&self, members: Vec<Node>) -> Arc<ClusterView> {
        let version = self.view_tx.borrow().version + 1;
        let view = Arc::new(ClusterView::build(
            version,
            members,
            self.partition_count,
            self.backup_count,
        ));
        self.view_tx.send_replace(view.clone());
        view
    }
}

impl ClusterTopology for ManualTopology {
    fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    fn hosts_data(&self) -> bool {
        self.hosts_data
    }

    fn current_view(&self) -> Arc<ClusterView> {
        self.view_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<ClusterView>> {
        self.view_tx.subscribe()
    }
}

use super::types::{Envelope, GossipPayload, Node, NodeId, NodeRole, NodeState};
use super::view::{ClusterTopology, ClusterView};
use crate::config::MembershipConfig;
use crate::error::{GridError, Result};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

const MAX_DATAGRAM: usize = 65_536;

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: AtomicU64,
    config: MembershipConfig,
    view_tx: watch::Sender<Arc<ClusterView>>,
    /// Serialises view recomputation so there is exactly one writer.
    view_lock: Mutex<()>,
    ping_order: Mutex<Vec<NodeId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    /// Binds the gossip socket. The node knows only itself and publishes no
    /// view until `join` (or `refresh_view`) runs.
    pub async fn new(config: &MembershipConfig, http_addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(config.gossip_bind).await?;
        let gossip_addr = socket.local_addr()?;
        let local_node = Node {
            id: NodeId::new(),
            gossip_addr,
            http_addr,
            role: NodeRole::Member,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        let (view_tx, _) = watch::channel(Arc::new(ClusterView::empty(
            config.partition_count,
            config.backup_count,
        )));

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: AtomicU64::new(1),
            config: config.clone(),
            view_tx,
            view_lock: Mutex::new(()),
            ping_order: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Creates the service, performs the join handshake and starts the
    /// background loops. Seeds pointing at this node's own gossip address
    /// are ignored; with no other seeds the node founds a new cluster.
    pub async fn join(
        config: &MembershipConfig,
        seeds: &[SocketAddr],
        http_addr: SocketAddr,
    ) -> Result<Arc<Self>> {
        let service = Self::new(config, http_addr).await?;
        let seeds: Vec<SocketAddr> = seeds
            .iter()
            .copied()
            .filter(|seed| *seed != service.local_node.gossip_addr)
            .collect();

        if seeds.is_empty() {
            info!("Starting as seed node (founder)");
            service.refresh_view();
        } else {
            service.join_via_seeds(&seeds).await?;
        }

        service.clone().start().await;
        Ok(service)
    }

    async fn join_via_seeds(&self, seeds: &[SocketAddr]) -> Result<()> {
        info!("Joining cluster via {} seed node(s)", seeds.len());

        let deadline = tokio::time::Instant::now() + self.config.join_timeout();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            for seed in seeds {
                let payload = GossipPayload::Join {
                    node: self.local_node.clone(),
                };
                if let Err(e) = self.send(payload, *seed).await {
                    tracing::warn!("Failed to send join request to {}: {}", seed, e);
                } else {
                    tracing::debug!("Sent join request to {}", seed);
                }
            }

            let round_end = (tokio::time::Instant::now() + self.config.gossip_interval()).min(deadline);
            loop {
                let received =
                    tokio::time::timeout_at(round_end, self.socket.recv_from(&mut buf)).await;
                let (len, src) = match received {
                    Err(_) => break,
                    Ok(Err(e)) => {
                        tracing::warn!("Failed to receive during join: {}", e);
                        continue;
                    }
                    Ok(Ok(datagram)) => datagram,
                };

                match bincode::deserialize::<Envelope>(&buf[..len]) {
                    Ok(envelope) => {
                        let accepted = matches!(envelope.payload, GossipPayload::JoinAck { .. });
                        if let Err(e) = self.handle_message(envelope, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                        if accepted {
                            info!(
                                "Joined cluster, view has {} members",
                                self.current_view().members.len()
                            );
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(GridError::Membership(format!(
                    "no reachable seed among {:?}",
                    seeds
                )));
            }
        }
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        self.tasks
            .lock()
            .extend([gossip_handle, receive_handle, failure_detection_handle]);

        tracing::info!("All background tasks started");
    }

    /// Announces a graceful departure and stops the background loops.
    pub async fn leave(&self) {
        info!("Node {} leaving cluster", self.local_node.id);
        self.broadcast_message(GossipPayload::Leave {
            node_id: self.local_node.id.clone(),
        })
        .await;

        self.shutdown();
    }

    /// Stops the background loops without telling anyone. Peers will
    /// eventually declare this node dead.
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    /// Calls `callback` with every view published after this call.
    pub fn on_view_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Arc<ClusterView>) + Send + Sync + 'static,
    {
        let mut rx = self.view_tx.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let view = rx.borrow_and_update().clone();
                callback(view);
            }
        })
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state.is_live())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::SeqCst)
    }

    /// Recomputes the view from the member table and publishes it when the
    /// live membership changed. Must not be called while holding a guard
    /// into `members`.
    pub fn refresh_view(&self) {
        let _writer = self.view_lock.lock();

        let live: Vec<Node> = self
            .members
            .iter()
            .filter(|entry| {
                let node = entry.value();
                node.state.is_live() && node.role == NodeRole::Member
            })
            .map(|entry| entry.value().clone())
            .collect();

        let current = self.view_tx.borrow().clone();
        let candidate = ClusterView::build(
            current.version + 1,
            live,
            self.config.partition_count,
            self.config.backup_count,
        );

        if current.version > 0 && candidate.same_membership(&current) {
            return;
        }

        info!(
            "View {} -> {}: {} members",
            current.version,
            candidate.version,
            candidate.members.len()
        );
        self.view_tx.send_replace(Arc::new(candidate));
    }

    fn envelope(&self, payload: GossipPayload) -> Envelope {
        Envelope {
            sender: self.local_node.id.clone(),
            view_version: self.view_tx.borrow().version,
            payload,
        }
    }

    async fn send(&self, payload: GossipPayload, target: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(&self.envelope(payload))?;
        self.socket.send_to(&encoded, target).await?;
        Ok(())
    }

    fn next_ping_target(&self) -> Option<Node> {
        let mut order = self.ping_order.lock();

        if order.is_empty() {
            let mut ids: Vec<NodeId> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id && entry.value().state.is_live()
                })
                .map(|entry| entry.key().clone())
                .collect();
            ids.shuffle(&mut rand::thread_rng());
            *order = ids;
        }

        while let Some(id) = order.pop() {
            if let Some(node) = self.get_member(&id)
                && node.state.is_live()
            {
                return Some(node);
            }
        }

        None
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval());

        loop {
            interval.tick().await;

            let Some(target) = self.next_ping_target() else {
                continue;
            };

            let payload = GossipPayload::Ping {
                incarnation: self.incarnation(),
            };

            if let Err(e) = self.send(payload, target.gossip_addr).await {
                tracing::warn!("Failed to send ping to {:?}: {}", target.id, e);
            } else {
                tracing::debug!("Sent ping to {:?}", target.id);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<Envelope>(&buf[..len]) {
                    Ok(envelope) => {
                        if let Err(e) = self.handle_message(envelope, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, envelope: Envelope, src: SocketAddr) -> Result<()> {
        let Envelope {
            sender,
            view_version,
            payload,
        } = envelope;

        tracing::trace!(
            "Received {} from {:?} (view {})",
            payload.kind(),
            sender,
            view_version
        );

        self.record_contact(&sender);
        let mut view_changed = false;

        match payload {
            GossipPayload::Join { node } => {
                view_changed |= self.handle_join(node, src).await?;
            }

            GossipPayload::JoinAck { members } | GossipPayload::Ack { members, .. } => {
                for member in members {
                    view_changed |= self.merge_member(member).await;
                }
            }

            GossipPayload::Ping { incarnation } => {
                self.handle_ping(&sender, incarnation, src).await?;
            }

            GossipPayload::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
            }

            GossipPayload::Alive {
                node_id,
                incarnation,
            } => {
                view_changed |= self.handle_alive(node_id, incarnation);
            }

            GossipPayload::Leave { node_id } => {
                view_changed |= self.handle_leave(&node_id);
            }
        }

        if view_changed {
            self.refresh_view();
        }

        Ok(())
    }

    /// Any datagram is direct evidence that its sender is up.
    fn record_contact(&self, sender: &NodeId) {
        if let Some(mut member) = self.members.get_mut(sender) {
            member.last_seen = Some(Instant::now());
            if member.state == NodeState::Suspect {
                tracing::info!("{:?} answered, clearing suspicion", sender);
                member.state = NodeState::Alive;
            }
        }
    }

    async fn handle_ping(&self, from: &NodeId, from_incarnation: u64, src: SocketAddr) -> Result<()> {
        tracing::debug!("Received ping from {:?}", from);

        if let Some(mut member) = self.members.get_mut(from)
            && from_incarnation > member.incarnation
        {
            member.incarnation = from_incarnation;
        }

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let reply = GossipPayload::Ack {
            incarnation: self.incarnation(),
            members: all_members,
        };
        self.send(reply, src).await?;

        tracing::debug!("Sent ack to {:?} with {} members", from, self.members.len());

        Ok(())
    }

    async fn handle_join(&self, mut node: Node, src: SocketAddr) -> Result<bool> {
        tracing::info!("Node {:?} joining cluster at {}", node.id, node.gossip_addr);

        node.last_seen = Some(Instant::now());
        node.state = NodeState::Alive;
        self.members.insert(node.id.clone(), node);

        tracing::info!("Cluster size now: {}", self.get_alive_members().len());

        // Publish the enlarged view before acknowledging, so the joiner's
        // first requests find a view that already contains it.
        self.refresh_view();

        let members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.send(GossipPayload::JoinAck { members }, src).await?;

        Ok(false)
    }

    /// Merges a gossiped member record. Returns true if the live set changed.
    async fn merge_member(&self, new_member: Node) -> bool {
        if new_member.id == self.local_node.id {
            if new_member.state != NodeState::Alive && new_member.incarnation >= self.incarnation()
            {
                self.refute().await;
            }
            return false;
        }

        let mut changed = false;
        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    changed = existing.state.is_live() != new_member.state.is_live()
                        || existing.http_addr != new_member.http_addr;
                    existing.state = new_member.state;
                    existing.incarnation = new_member.incarnation;
                    existing.http_addr = new_member.http_addr;
                    existing.last_seen = Some(Instant::now());
                } else if new_member.incarnation == existing.incarnation
                    && matches!(new_member.state, NodeState::Dead | NodeState::Left)
                    && existing.state.is_live()
                {
                    tracing::info!("{:?} reported {:?} by peer", new_member.id, new_member.state);
                    existing.state = new_member.state;
                    changed = true;
                }
            }
            None => {
                if new_member.state.is_live() {
                    tracing::info!(
                        "Discovered new member: {:?} at {}",
                        new_member.id,
                        new_member.gossip_addr
                    );

                    let mut member_with_timestamp = new_member;
                    member_with_timestamp.last_seen = Some(Instant::now());
                    self.members
                        .insert(member_with_timestamp.id.clone(), member_with_timestamp);
                    changed = true;
                }
            }
        }

        changed
    }

    /// Bumps our incarnation and tells everyone we are alive.
    async fn refute(&self) {
        let my_incarnation = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut me) = self.members.get_mut(&self.local_node.id) {
            me.incarnation = my_incarnation;
            me.state = NodeState::Alive;
        }

        tracing::info!("Refuting suspicion with incarnation {}", my_incarnation);
        self.broadcast_message(GossipPayload::Alive {
            node_id: self.local_node.id.clone(),
            incarnation: my_incarnation,
        })
        .await;
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            if incarnation >= self.incarnation() {
                self.refute().await;
            }
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Node {:?} at {} suspected", existing.id, existing.gossip_addr);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
            }
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) -> bool {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    tracing::info!(
                        "Node {:?} at {} is now Alive (inc={})",
                        existing.id,
                        existing.gossip_addr,
                        incarnation
                    );
                    let revived = !existing.state.is_live();
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                    revived
                } else if incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!(
                        "Node {:?} at {} successfully refuted suspicion",
                        existing.id,
                        existing.gossip_addr,
                    );
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                    false
                } else {
                    false
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {:?}", node_id);
                false
            }
        }
    }

    fn handle_leave(&self, node_id: &NodeId) -> bool {
        match self.members.get_mut(node_id) {
            Some(mut existing) if existing.state.is_live() => {
                tracing::info!("Node {:?} left the cluster", node_id);
                existing.state = NodeState::Left;
                true
            }
            _ => false,
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval() * 2);
        let suspect_timeout = self.config.suspect_timeout();
        let dead_timeout = self.config.dead_timeout();

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();
            let mut view_changed = false;

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive => {
                        if elapsed > suspect_timeout {
                            tracing::warn!(
                                "Node {:?} suspected (no contact for {:?})",
                                member.id,
                                elapsed
                            );

                            member.state = NodeState::Suspect;
                            member.last_seen = Some(now);

                            messages_to_broadcast.push(GossipPayload::Suspect {
                                node_id: member.id.clone(),
                                incarnation: member.incarnation,
                            });
                        }
                    }

                    NodeState::Suspect => {
                        if elapsed > dead_timeout {
                            tracing::warn!(
                                "Node {:?} declared DEAD (no contact for {:?})",
                                member.id,
                                elapsed
                            );
                            member.state = NodeState::Dead;
                            view_changed = true;
                        }
                    }

                    NodeState::Dead | NodeState::Left => {}
                }
            }

            if view_changed {
                self.refresh_view();
                tracing::info!(
                    "Cluster size now: {} alive nodes",
                    self.get_alive_members().len()
                );
            }

            for payload in messages_to_broadcast {
                self.broadcast_message(payload).await;
            }
        }
    }

    async fn broadcast_message(&self, payload: GossipPayload) {
        let targets: Vec<(NodeId, SocketAddr)> = self
            .members
            .iter()
            .filter(|entry| {
                entry.value().id != self.local_node.id && entry.value().state.is_live()
            })
            .map(|entry| (entry.value().id.clone(), entry.value().gossip_addr))
            .collect();

        let encoded = match bincode::serialize(&self.envelope(payload)) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };

        for (id, addr) in targets {
            if let Err(e) = self.socket.send_to(&encoded, addr).await {
                tracing::warn!("Failed to broadcast to {:?}: {}", id, e);
            }
        }
    }
}

impl ClusterTopology for MembershipService {
    fn local_id(&self) -> &NodeId {
        &self.local_node.id
    }

    fn hosts_data(&self) -> bool {
        true
    }

    fn current_view(&self) -> Arc<ClusterView> {
        self.view_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<ClusterView>> {
        self.view_tx.subscribe()
    }
}

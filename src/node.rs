//! Process-level wiring.
//!
//! A `GridNode` is everything one process runs: the topology source (gossip
//! membership or a client gateway), the session map, the internal HTTP
//! server, the session repository and, on data members, the eviction
//! scheduler.

use crate::config::{GridConfig, Mode};
use crate::error::Result;
use crate::eviction::scheduler::EvictionScheduler;
use crate::membership;
use crate::membership::client::ClientGateway;
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::membership::view::{ClusterTopology, ClusterView};
use crate::session::repository::{SessionRepository, SessionStore};
use crate::storage;
use crate::storage::map::PartitionedMap;

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Where this process gets its cluster view from.
enum Role {
    Member(Arc<MembershipService>),
    Client(Arc<ClientGateway>),
}

pub struct GridNode {
    role: Role,
    topology: Arc<dyn ClusterTopology>,
    map: Arc<PartitionedMap>,
    repository: Arc<SessionRepository>,
    scheduler: Option<Arc<EvictionScheduler>>,
    http_addr: Option<SocketAddr>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl GridNode {
    /// Starts a process in the configured mode. Embedded members join (or
    /// found) the cluster and serve the data plane; clients attach to the
    /// listed servers.
    pub async fn start(config: GridConfig) -> Result<Arc<Self>> {
        config.validate()?;

        match &config.mode {
            Mode::Embedded { seeds } => Self::start_embedded(&config, seeds).await,
            Mode::Client { servers } => Self::start_client(&config, servers).await,
        }
    }

    async fn start_embedded(config: &GridConfig, seeds: &[SocketAddr]) -> Result<Arc<Self>> {
        // Bound before joining: peers may call in as soon as the view
        // includes us, and connections queue until the server runs.
        let listener = TcpListener::bind(config.membership.http_bind).await?;
        let http_addr = listener.local_addr()?;

        let membership = MembershipService::join(&config.membership, seeds, http_addr).await?;
        tracing::info!(
            "Member {} up (gossip={} http={})",
            membership.local_node.id,
            membership.local_node.gossip_addr,
            http_addr
        );
        let topology: Arc<dyn ClusterTopology> = membership.clone();

        let map = PartitionedMap::new(
            topology.clone(),
            &config.storage,
            config.membership.partition_count,
            &config.session.indexes,
        );

        let app = storage::handlers::router(map.clone())
            .merge(membership::handlers::router(topology.clone()));
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server stopped: {}", e);
            }
        });
        tracing::info!("HTTP server listening on {}", http_addr);

        map.start().await;

        let repository = SessionRepository::new(map.clone(), &config.session);
        repository.start();

        let scheduler = EvictionScheduler::new(map.clone(), &config.eviction);
        scheduler.start();

        Ok(Arc::new(Self {
            role: Role::Member(membership),
            topology,
            map,
            repository,
            scheduler: Some(scheduler),
            http_addr: Some(http_addr),
            server: Mutex::new(Some(server)),
        }))
    }

    async fn start_client(config: &GridConfig, servers: &[SocketAddr]) -> Result<Arc<Self>> {
        let gateway = ClientGateway::connect(&config.membership, &config.storage, servers).await?;
        let topology: Arc<dyn ClusterTopology> = gateway.clone();

        let map = PartitionedMap::new(
            topology.clone(),
            &config.storage,
            config.membership.partition_count,
            &config.session.indexes,
        );
        map.start().await;

        let repository = SessionRepository::new(map.clone(), &config.session);

        Ok(Arc::new(Self {
            role: Role::Client(gateway),
            topology,
            map,
            repository,
            scheduler: None,
            http_addr: None,
            server: Mutex::new(None),
        }))
    }

    /// The session API of this process.
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.repository.clone()
    }

    pub fn repository(&self) -> &Arc<SessionRepository> {
        &self.repository
    }

    pub fn map(&self) -> &Arc<PartitionedMap> {
        &self.map
    }

    pub fn local_id(&self) -> &NodeId {
        self.topology.local_id()
    }

    pub fn current_view(&self) -> Arc<ClusterView> {
        self.topology.current_view()
    }

    pub fn is_client(&self) -> bool {
        matches!(self.role, Role::Client(_))
    }

    /// Address of the internal HTTP data plane; clients have none.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn membership(&self) -> Option<&Arc<MembershipService>> {
        match &self.role {
            Role::Member(service) => Some(service),
            Role::Client(_) => None,
        }
    }

    /// Announces departure to the cluster, then stops everything.
    pub async fn leave(&self) {
        if let Role::Member(service) = &self.role {
            service.leave().await;
        }
        self.shutdown();
    }

    /// Stops all background work without announcing anything.
    pub fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        self.repository.stop();
        self.map.stop();
        match &self.role {
            Role::Member(service) => service.shutdown(),
            Role::Client(gateway) => gateway.shutdown(),
        }
        if let Some(server) = self.server.lock().take() {
            server.abort();
        }
        tracing::info!("Node {} stopped", self.topology.local_id());
    }
}

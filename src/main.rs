use clap::Parser;
use session_grid::config::{GridConfig, Mode};
use session_grid::node::GridNode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Runs one member (or thin client) of a session grid.
#[derive(Debug, Parser)]
#[command(name = "session-grid-node", version)]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// UDP address for gossip.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// TCP address for the internal HTTP data plane.
    #[arg(long)]
    http: Option<SocketAddr>,

    /// Gossip address of an existing member; repeat for several.
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// Attach as a client that hosts no data.
    #[arg(long, requires = "servers")]
    client: bool,

    /// HTTP address of a member to attach to (client mode); repeat for several.
    #[arg(long = "server")]
    servers: Vec<SocketAddr>,
}

impl Args {
    fn apply(&self, config: &mut GridConfig) {
        if let Some(bind) = self.bind {
            config.membership.gossip_bind = bind;
        }
        if let Some(http) = self.http {
            config.membership.http_bind = http;
        }
        if self.client {
            config.mode = Mode::Client {
                servers: self.servers.clone(),
            };
        } else if !self.seeds.is_empty() {
            config.mode = Mode::Embedded {
                seeds: self.seeds.clone(),
            };
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GridConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config.mode {
        Mode::Embedded { seeds } if seeds.is_empty() => {
            tracing::info!("Starting as seed node (founder)");
        }
        Mode::Embedded { seeds } => tracing::info!("Seed nodes: {:?}", seeds),
        Mode::Client { servers } => tracing::info!("Client of servers: {:?}", servers),
    }

    let node = GridNode::start(config).await?;
    tracing::info!("Node ID: {}", node.local_id());

    // Stats reporter
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let view = stats_node.current_view();
            tracing::info!(
                "Cluster stats: view {} with {} members, {} partitions held, {} entries",
                view.version,
                view.members.len(),
                stats_node.map().local_partition_count(),
                stats_node.map().local_entry_count()
            );
            for member in &view.members {
                tracing::info!(
                    "  - {} gossip={} http={} (inc={})",
                    member.id,
                    member.gossip_addr,
                    member.http_addr,
                    member.incarnation
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    node.leave().await;
    Ok(())
}

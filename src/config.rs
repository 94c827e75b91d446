//! Configuration for grid nodes.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! single embedded member on localhost. Values are layered: defaults, then an
//! optional TOML file, then `SESSION_GRID__*` environment variables
//! (e.g. `SESSION_GRID__SESSION__FLUSH_MODE=immediate`).

use crate::error::{GridError, Result};
use crate::index::types::{IndexDefinition, IndexKind};
use crate::session::types::{FlushMode, SaveMode};
use crate::storage::types::ReplicationMode;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub mode: Mode,
    pub membership: MembershipConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub eviction: EvictionConfig,
    pub log_level: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            membership: MembershipConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            eviction: EvictionConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// How this process takes part in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mode {
    /// Hosts partitions and serves the data plane. An empty seed list makes
    /// this node the founder of a new cluster.
    Embedded {
        #[serde(default)]
        seeds: Vec<SocketAddr>,
    },
    /// Hosts nothing; attaches to the HTTP endpoints of existing members.
    Client { servers: Vec<SocketAddr> },
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Embedded { seeds: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// UDP address for gossip (port 0 picks a free port).
    pub gossip_bind: SocketAddr,
    /// TCP address for the internal HTTP data plane (port 0 picks a free port).
    pub http_bind: SocketAddr,
    pub gossip_interval_ms: u64,
    pub suspect_timeout_ms: u64,
    pub dead_timeout_ms: u64,
    pub join_timeout_ms: u64,
    /// How often a client gateway re-fetches the view from its servers.
    pub view_refresh_ms: u64,
    pub partition_count: u32,
    pub backup_count: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            gossip_bind: SocketAddr::from(([127, 0, 0, 1], 5701)),
            http_bind: SocketAddr::from(([127, 0, 0, 1], 6701)),
            gossip_interval_ms: 500,
            suspect_timeout_ms: 5_000,
            dead_timeout_ms: 10_000,
            join_timeout_ms: 5_000,
            view_refresh_ms: 1_000,
            partition_count: 271,
            backup_count: 1,
        }
    }
}

impl MembershipConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn view_refresh(&self) -> Duration {
        Duration::from_millis(self.view_refresh_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name of the session map; namespaces the internal HTTP routes.
    pub map_name: String,
    pub replication: ReplicationMode,
    /// Per-attempt deadline for calls to another member.
    pub request_timeout_ms: u64,
    /// Bound on attempts for one logical operation (routing and transport).
    pub max_attempts: usize,
    /// First retry delay; doubles per attempt up to eight times this value.
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            map_name: "spring-session-map-name".to_string(),
            replication: ReplicationMode::Sync,
            request_timeout_ms: 500,
            max_attempts: 3,
            retry_backoff_ms: 150,
        }
    }
}

impl StorageConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie the HTTP adapter maps to the session id.
    pub cookie_name: String,
    pub flush_mode: FlushMode,
    pub save_mode: SaveMode,
    pub max_inactive_interval_secs: u64,
    /// Attribute whose writes are version-checked (login transitions).
    pub principal_attribute: String,
    pub indexes: Vec<IndexDefinition>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "SESSION".to_string(),
            flush_mode: FlushMode::Immediate,
            save_mode: SaveMode::Always,
            max_inactive_interval_secs: 120,
            principal_attribute: "principal".to_string(),
            indexes: vec![IndexDefinition {
                attribute: "principal".to_string(),
                kind: IndexKind::Hash,
            }],
        }
    }
}

impl SessionConfig {
    pub fn max_inactive_interval(&self) -> Duration {
        Duration::from_secs(self.max_inactive_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub interval_ms: u64,
    /// How long a partition this node no longer replicates is kept before
    /// its local copy is dropped.
    pub release_grace_ms: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            release_grace_ms: 60_000,
        }
    }
}

impl EvictionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl GridConfig {
    /// Loads defaults, then `path` (if given and present), then the
    /// environment, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("SESSION_GRID")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: GridConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.membership;
        if m.partition_count == 0 {
            return Err(GridError::InvalidConfig(
                "partition_count must be positive".into(),
            ));
        }
        if m.suspect_timeout_ms <= m.gossip_interval_ms {
            return Err(GridError::InvalidConfig(
                "suspect_timeout_ms must exceed gossip_interval_ms".into(),
            ));
        }
        if m.dead_timeout_ms < m.suspect_timeout_ms {
            return Err(GridError::InvalidConfig(
                "dead_timeout_ms must not be below suspect_timeout_ms".into(),
            ));
        }
        if self.storage.max_attempts == 0 {
            return Err(GridError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.storage.map_name.is_empty()
            || !self
                .storage
                .map_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GridError::InvalidConfig(format!(
                "map_name '{}' must be non-empty and URL-safe",
                self.storage.map_name
            )));
        }
        if let Mode::Client { servers } = &self.mode
            && servers.is_empty()
        {
            return Err(GridError::InvalidConfig(
                "client mode requires at least one server address".into(),
            ));
        }
        if self.eviction.interval_ms == 0 {
            return Err(GridError::InvalidConfig(
                "eviction interval must be positive".into(),
            ));
        }
        let principal_indexed = self
            .session
            .indexes
            .iter()
            .any(|def| def.attribute == self.session.principal_attribute);
        if !principal_indexed {
            tracing::warn!(
                "Principal attribute '{}' has no index; lookups by principal will fail",
                self.session.principal_attribute
            );
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

/// When in-memory session mutations become visible cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Every mutation is written to the owner before the mutating call returns.
    #[default]
    Immediate,
    /// Mutations stay local until the session is saved.
    OnSave,
}

/// Which accesses make an attribute part of the next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Every attribute is written on every save.
    #[default]
    Always,
    /// Only attributes set or removed since the last save.
    OnSetAttribute,
    /// Attributes read since the last save are written back as well.
    OnGetAttribute,
}

/// Lifecycle of a session: `New -> Active -> (Expired | Destroyed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created locally, not yet stored in the cluster.
    New,
    /// Stored and loaded at least once.
    Active,
    /// Found idle past its limit.
    Expired,
    /// Explicitly invalidated.
    Destroyed,
}

/// Notifications published by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Created { id: String },
    Deleted { id: String },
    Expired { id: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { id }
            | SessionEvent::Deleted { id }
            | SessionEvent::Expired { id } => id,
        }
    }
}

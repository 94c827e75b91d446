use super::repository::SessionStore;
use super::types::{SaveMode, SessionState};
use crate::error::Result;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One user session as seen by a web-server process.
///
/// Holds the decoded attributes plus the changes made since the last save.
/// Under `FlushMode::Immediate` the session carries a handle to its store
/// and every mutation is saved before the mutating call returns.
#[derive(Clone)]
pub struct Session {
    pub(super) id: String,
    pub(super) attributes: HashMap<String, Value>,
    /// Attribute names to write on the next save. Removed attributes are in
    /// here too and absent from `attributes`.
    pub(super) dirty: BTreeSet<String>,
    pub(super) creation_time: u64,
    pub(super) last_accessed_time: u64,
    pub(super) max_inactive_interval: Duration,
    pub(super) state: SessionState,
    /// Entry version observed at load or at the last save.
    pub(super) observed_version: u64,
    pub(super) persisted: bool,
    pub(super) last_accessed_changed: bool,
    pub(super) max_inactive_changed: bool,
    pub(super) save_mode: SaveMode,
    pub(super) flusher: Option<Arc<dyn SessionStore>>,
}

impl Session {
    /// A session that exists only in this process until saved.
    pub fn new(id: impl Into<String>, now: u64, max_inactive_interval: Duration, save_mode: SaveMode) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
            dirty: BTreeSet::new(),
            creation_time: now,
            last_accessed_time: now,
            max_inactive_interval,
            state: SessionState::New,
            observed_version: 0,
            persisted: false,
            last_accessed_changed: false,
            max_inactive_changed: false,
            save_mode,
            flusher: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> u64 {
        self.last_accessed_time
    }

    pub fn max_inactive_interval(&self) -> Duration {
        self.max_inactive_interval
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.observed_version
    }

    /// Not stored in the cluster yet.
    pub fn is_new(&self) -> bool {
        !self.persisted
    }

    /// Has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.last_accessed_changed || self.max_inactive_changed
    }

    pub fn is_expired(&self, now: u64) -> bool {
        let max_idle = self.max_inactive_interval.as_millis() as u64;
        max_idle > 0 && now.saturating_sub(self.last_accessed_time) > max_idle
    }

    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Under `SaveMode::OnGetAttribute` a read marks the attribute for
    /// write-back.
    pub fn get_attribute(&mut self, name: &str) -> Option<Value> {
        let value = self.attributes.get(name).cloned();
        if value.is_some() && self.save_mode == SaveMode::OnGetAttribute {
            self.dirty.insert(name.to_string());
        }
        value
    }

    pub fn get_attribute_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
        match self.get_attribute(name) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Sets `name` to `value`; a null value removes the attribute.
    pub async fn set_attribute<T: Serialize>(&mut self, name: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if value.is_null() {
            return self.remove_attribute(name).await;
        }
        self.attributes.insert(name.to_string(), value);
        self.dirty.insert(name.to_string());
        self.flush_if_immediate().await
    }

    pub async fn remove_attribute(&mut self, name: &str) -> Result<()> {
        self.attributes.remove(name);
        self.dirty.insert(name.to_string());
        self.flush_if_immediate().await
    }

    pub async fn set_last_accessed_time(&mut self, at: u64) -> Result<()> {
        self.last_accessed_time = at;
        self.last_accessed_changed = true;
        self.flush_if_immediate().await
    }

    pub async fn set_max_inactive_interval(&mut self, interval: Duration) -> Result<()> {
        self.max_inactive_interval = interval;
        self.max_inactive_changed = true;
        self.flush_if_immediate().await
    }

    async fn flush_if_immediate(&mut self) -> Result<()> {
        if let Some(store) = self.flusher.clone() {
            store.save(self).await?;
        }
        Ok(())
    }

    pub(super) fn mark_saved(&mut self, version: u64) {
        self.observed_version = version;
        self.persisted = true;
        self.dirty.clear();
        self.last_accessed_changed = false;
        self.max_inactive_changed = false;
        if self.state == SessionState::New {
            self.state = SessionState::Active;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("version", &self.observed_version)
            .field("attributes", &self.attribute_names())
            .field("dirty", &self.dirty)
            .field("immediate", &self.flusher.is_some())
            .finish()
    }
}

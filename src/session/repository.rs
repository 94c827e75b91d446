use super::codec::{AttributeCodec, JsonCodec};
use super::session::Session;
use super::types::{FlushMode, SaveMode, SessionEvent, SessionState};
use crate::config::SessionConfig;
use crate::error::{GridError, Result};
use crate::index::types::IndexQuery;
use crate::storage::map::PartitionedMap;
use crate::storage::types::{Attributes, Entry, EntryProcessor, EntrySeed, EntryUpdate, now_ms};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1_024;
const ID_ATTEMPTS: usize = 3;

/// What the HTTP adapter talks to.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A fresh session with a new id; stored right away under
    /// `FlushMode::Immediate`.
    async fn create_session(&self) -> Result<Session>;

    /// Loads `id` and records the access. Missing and expired sessions are
    /// `None`.
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    async fn save(&self, session: &mut Session) -> Result<()>;

    /// Idempotent.
    async fn destroy_session(&self, id: &str) -> Result<()>;

    /// Sessions whose indexed `attribute` equals `value`, keyed by id.
    async fn find_by_index(&self, attribute: &str, value: &Value) -> Result<HashMap<String, Session>>;

    /// Moves the session to a freshly generated id and returns it.
    async fn change_session_id(&self, session: &mut Session) -> Result<String>;
}

/// `SessionStore` backed by a partitioned map.
///
/// Each session is one map entry keyed by its id. Attribute values go
/// through the codec, so index lookups compare encoded bytes.
pub struct SessionRepository {
    map: Arc<PartitionedMap>,
    codec: Arc<dyn AttributeCodec>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
    this: Weak<SessionRepository>,
}

impl SessionRepository {
    pub fn new(map: Arc<PartitionedMap>, config: &SessionConfig) -> Arc<Self> {
        Self::with_codec(map, config, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        map: Arc<PartitionedMap>,
        config: &SessionConfig,
        codec: Arc<dyn AttributeCodec>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            map,
            codec,
            config: config.clone(),
            events,
            expiry_task: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Starts republishing expirations seen by the map as session events.
    pub fn start(&self) {
        let mut expired = self.map.subscribe_expirations();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            loop {
                match expired.recv().await {
                    Ok(entry) => {
                        tracing::debug!("Session {} expired", entry.key);
                        let _ = events.send(SessionEvent::Expired { id: entry.key });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} expiration notifications", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        if let Some(previous) = self.expiry_task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.expiry_task.lock().take() {
            handle.abort();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn map(&self) -> &Arc<PartitionedMap> {
        &self.map
    }

    /// A new, unsaved session with a caller-chosen id, e.g. one presented
    /// by a client. Saving it fails if the id is already taken.
    pub fn session_with_id(&self, id: &str) -> Session {
        let mut session = Session::new(
            id,
            now_ms(),
            self.config.max_inactive_interval(),
            self.config.save_mode,
        );
        session.flusher = self.flusher();
        session
    }

    /// Marks `session` destroyed and removes it from the cluster.
    pub async fn invalidate(&self, session: &mut Session) -> Result<()> {
        session.flusher = None;
        session.state = SessionState::Destroyed;
        self.destroy_session(&session.id).await
    }

    fn flusher(&self) -> Option<Arc<dyn SessionStore>> {
        if self.config.flush_mode != FlushMode::Immediate {
            return None;
        }
        let this: Arc<dyn SessionStore> = self.this.upgrade()?;
        Some(this)
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn generate_id(&self) -> Result<String> {
        for _ in 0..ID_ATTEMPTS {
            let id = Uuid::new_v4().simple().to_string();
            if self.map.get(&id).await?.is_none() {
                return Ok(id);
            }
            tracing::warn!("Generated session id {} is already taken", id);
        }
        Err(GridError::Internal(
            "could not generate an unused session id".to_string(),
        ))
    }

    fn encode_all(&self, session: &Session) -> Result<Attributes> {
        session
            .attributes
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.codec.encode(value)?)))
            .collect()
    }

    fn seed(&self, session: &Session) -> Result<EntrySeed> {
        Ok(EntrySeed {
            attributes: self.encode_all(session)?,
            created_at: session.creation_time,
            last_accessed: session.last_accessed_time,
            max_idle_ms: session.max_inactive_interval.as_millis() as u64,
        })
    }

    fn decode(&self, entry: Entry) -> Result<Session> {
        let attributes = entry
            .attributes
            .iter()
            .map(|(name, bytes)| Ok((name.clone(), self.codec.decode(bytes)?)))
            .collect::<Result<HashMap<String, Value>>>()?;

        let mut session = Session::new(
            entry.key,
            entry.created_at,
            Duration::from_millis(entry.max_idle_ms),
            self.config.save_mode,
        );
        session.attributes = attributes;
        session.last_accessed_time = entry.last_accessed;
        session.state = SessionState::Active;
        session.mark_saved(entry.version);
        session.flusher = self.flusher();
        Ok(session)
    }

    /// The write for an already stored session, or `None` if nothing
    /// changed.
    fn delta(&self, session: &Session) -> Result<Option<EntryUpdate>> {
        let mut update = EntryUpdate::default();

        // The guarded attribute is written only when dirty, and then always
        // under a version check.
        let guarded = &self.config.principal_attribute;
        let names: Vec<&String> = match session.save_mode {
            SaveMode::Always => session
                .attributes
                .keys()
                .filter(|name| *name != guarded || session.dirty.contains(*name))
                .chain(session.dirty.iter())
                .collect(),
            SaveMode::OnSetAttribute | SaveMode::OnGetAttribute => session.dirty.iter().collect(),
        };
        for name in names {
            match session.attributes.get(name) {
                Some(value) => {
                    update.set.insert(name.clone(), self.codec.encode(value)?);
                }
                None => update.removed.push(name.clone()),
            }
        }
        update.removed.sort();
        update.removed.dedup();

        if session.last_accessed_changed {
            update.last_accessed = Some(session.last_accessed_time);
        }
        if session.max_inactive_changed {
            update.max_idle_ms = Some(session.max_inactive_interval.as_millis() as u64);
        }
        if update.set.contains_key(guarded) || update.removed.contains(guarded) {
            update.expected_version = Some(session.observed_version);
        }

        let empty = update.set.is_empty()
            && update.removed.is_empty()
            && update.last_accessed.is_none()
            && update.max_idle_ms.is_none();
        Ok((!empty).then_some(update))
    }

    async fn save_new(&self, session: &mut Session) -> Result<()> {
        let seed = self.seed(session)?;
        match self.map.insert_new(&session.id, seed).await {
            Ok(version) => {
                session.mark_saved(version);
                tracing::debug!("Created session {}", session.id);
                self.publish(SessionEvent::Created {
                    id: session.id.clone(),
                });
                Ok(())
            }
            Err(GridError::AlreadyExists(_)) => Err(GridError::session_exists(&session.id)),
            Err(e) => Err(e),
        }
    }

    async fn save_delta(&self, session: &mut Session) -> Result<()> {
        let Some(update) = self.delta(session)? else {
            return Ok(());
        };

        let result = self
            .map
            .compute_if_present(&session.id, EntryProcessor::Update(update))
            .await;

        match result {
            Ok(Some(entry)) => {
                session.last_accessed_time = session.last_accessed_time.max(entry.last_accessed);
                session.mark_saved(entry.version);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!("Session {} vanished before save, dropping changes", session.id);
                session.state = SessionState::Expired;
                session.dirty.clear();
                Ok(())
            }
            Err(GridError::VersionConflict {
                expected, actual, ..
            }) => {
                tracing::info!(
                    "Session {} changed concurrently (loaded v{}, stored v{})",
                    session.id,
                    expected,
                    actual
                );
                Err(GridError::SessionConflict(format!(
                    "Session {} was modified concurrently",
                    session.id
                )))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn create_session(&self) -> Result<Session> {
        let id = self.generate_id().await?;
        let mut session = self.session_with_id(&id);
        if self.config.flush_mode == FlushMode::Immediate {
            self.save(&mut session).await?;
        }
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let touched = self
            .map
            .compute_if_present(id, EntryProcessor::Touch { now: now_ms() })
            .await?;

        touched.map(|entry| self.decode(entry)).transpose()
    }

    async fn save(&self, session: &mut Session) -> Result<()> {
        match session.state {
            SessionState::Destroyed | SessionState::Expired => {
                tracing::debug!("Not saving {:?} session {}", session.state, session.id);
                Ok(())
            }
            SessionState::New | SessionState::Active if !session.persisted => {
                self.save_new(session).await
            }
            SessionState::New | SessionState::Active => self.save_delta(session).await,
        }
    }

    async fn destroy_session(&self, id: &str) -> Result<()> {
        if self.map.remove(id).await? {
            tracing::debug!("Destroyed session {}", id);
            self.publish(SessionEvent::Deleted { id: id.to_string() });
        }
        Ok(())
    }

    async fn find_by_index(&self, attribute: &str, value: &Value) -> Result<HashMap<String, Session>> {
        let encoded = self.codec.encode(value)?;
        let keys = self.map.query(&IndexQuery::equal(attribute, encoded)).await?;

        let mut sessions = HashMap::new();
        for key in keys {
            // Removed or expired between the query and the read.
            if let Some(entry) = self.map.get(&key).await? {
                sessions.insert(key, self.decode(entry)?);
            }
        }
        Ok(sessions)
    }

    async fn change_session_id(&self, session: &mut Session) -> Result<String> {
        let new_id = self.generate_id().await?;
        let old_id = std::mem::replace(&mut session.id, new_id.clone());

        if !session.persisted {
            return Ok(new_id);
        }

        let seed = match self.seed(session) {
            Ok(seed) => seed,
            Err(e) => {
                session.id = old_id;
                return Err(e);
            }
        };
        match self.map.insert_new(&new_id, seed).await {
            Ok(version) => session.mark_saved(version),
            Err(e) => {
                session.id = old_id;
                return Err(match e {
                    GridError::AlreadyExists(_) => GridError::session_exists(&new_id),
                    other => other,
                });
            }
        }

        self.map.remove(&old_id).await?;
        tracing::debug!("Session {} moved to {}", old_id, new_id);
        Ok(new_id)
    }
}

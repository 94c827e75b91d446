//! Session Module Tests
//!
//! ## Test Scopes
//! - **Lifecycle**: Create, load, destroy, change of id.
//! - **Flush & Save Modes**: When writes become visible and which attributes they carry.
//! - **Conflicts**: Re-creation of an existing id and concurrent principal changes.
//! - **Expiry**: Idle sessions read as absent and raise an `Expired` event.

#[cfg(test)]
mod tests {
    use crate::config::{SessionConfig, StorageConfig};
    use crate::error::GridError;
    use crate::membership::testing::{ManualTopology, test_node};
    use crate::session::codec::{AttributeCodec, JsonCodec};
    use crate::session::repository::{SessionRepository, SessionStore};
    use crate::session::types::{FlushMode, SaveMode, SessionEvent, SessionState};
    use crate::storage::map::PartitionedMap;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    const PARTITIONS: u32 = 8;

    async fn repository(flush_mode: FlushMode, save_mode: SaveMode) -> Arc<SessionRepository> {
        let local = test_node("solo", "127.0.0.1:1".parse().unwrap());
        let topology = ManualTopology::single(local, PARTITIONS, 1);
        let config = SessionConfig {
            flush_mode,
            save_mode,
            ..SessionConfig::default()
        };
        let map = PartitionedMap::new(
            topology,
            &StorageConfig::default(),
            PARTITIONS,
            &config.indexes,
        );
        map.start().await;
        SessionRepository::new(map, &config)
    }

    // ============================================================
    // CODEC TESTS
    // ============================================================

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec;
        let bytes = codec.encode(&json!({"cart": [1, 2]})).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), json!({"cart": [1, 2]}));
        assert!(matches!(
            codec.decode(b"\xff\x00"),
            Err(GridError::Serialization(_))
        ));
    }

    // ============================================================
    // LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_created_session_is_stored_immediately() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        let mut events = repo.subscribe();

        let session = repo.create_session().await.unwrap();

        assert_eq!(session.id().len(), 32, "UUID in simple form");
        assert!(session.id().chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!session.is_new());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Created {
                id: session.id().to_string()
            }
        );

        let loaded = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), SessionState::Active);
        assert_eq!(loaded.creation_time(), session.creation_time());
        assert_eq!(loaded.max_inactive_interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_on_save_session_is_stored_by_save() {
        let repo = repository(FlushMode::OnSave, SaveMode::OnSetAttribute).await;

        let mut session = repo.create_session().await.unwrap();
        assert!(session.is_new());
        assert_eq!(session.state(), SessionState::New);
        assert!(repo.get_session(session.id()).await.unwrap().is_none());

        repo.save(&mut session).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(repo.get_session(session.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_unknown_session_is_none() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        assert!(repo.get_session("no-such-session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        let mut session = repo.create_session().await.unwrap();
        let id = session.id().to_string();
        let mut events = repo.subscribe();

        repo.invalidate(&mut session).await.unwrap();
        repo.destroy_session(&id).await.unwrap();

        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(repo.get_session(&id).await.unwrap().is_none());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Deleted { id });
        assert!(events.try_recv().is_err(), "Second destroy is silent");
    }

    #[tokio::test]
    async fn test_change_session_id_moves_attributes() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        let mut session = repo.create_session().await.unwrap();
        session.set_attribute("principal", "alice").await.unwrap();
        let old_id = session.id().to_string();

        let new_id = repo.change_session_id(&mut session).await.unwrap();

        assert_ne!(new_id, old_id);
        assert_eq!(session.id(), new_id);
        assert!(repo.get_session(&old_id).await.unwrap().is_none());

        let mut moved = repo.get_session(&new_id).await.unwrap().unwrap();
        assert_eq!(moved.get_attribute("principal"), Some(json!("alice")));
        assert_eq!(moved.creation_time(), session.creation_time());
    }

    #[tokio::test]
    async fn test_find_by_principal() {
        let repo = repository(FlushMode::Immediate, SaveMode::OnSetAttribute).await;

        let mut alice_ids = Vec::new();
        for _ in 0..3 {
            let mut session = repo.create_session().await.unwrap();
            session.set_attribute("principal", "alice").await.unwrap();
            alice_ids.push(session.id().to_string());
        }
        let mut bob = repo.create_session().await.unwrap();
        bob.set_attribute("principal", "bob").await.unwrap();

        let found = repo
            .find_by_index("principal", &json!("alice"))
            .await
            .unwrap();

        let mut ids: Vec<String> = found.keys().cloned().collect();
        ids.sort();
        alice_ids.sort();
        assert_eq!(ids, alice_ids);

        // Principal moves from bob to carol.
        bob.set_attribute("principal", "carol").await.unwrap();
        assert!(
            repo.find_by_index("principal", &json!("bob"))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            repo.find_by_index("principal", &json!("carol"))
                .await
                .unwrap()
                .contains_key(bob.id())
        );
    }

    #[tokio::test]
    async fn test_find_by_unindexed_attribute_fails() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        let result = repo.find_by_index("colour", &json!("red")).await;
        assert!(matches!(result, Err(GridError::NoSuchIndex(_))));
    }

    // ============================================================
    // FLUSH & SAVE MODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_immediate_flush_is_visible_before_save() {
        let repo = repository(FlushMode::Immediate, SaveMode::OnSetAttribute).await;
        let mut session = repo.create_session().await.unwrap();

        session.set_attribute("cart", vec![1, 2, 3]).await.unwrap();

        let mut other = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(
            other.get_attribute_as::<Vec<u32>>("cart").unwrap(),
            Some(vec![1, 2, 3])
        );
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn test_on_save_flush_is_visible_after_save() {
        let repo = repository(FlushMode::OnSave, SaveMode::OnSetAttribute).await;
        let mut session = repo.create_session().await.unwrap();
        repo.save(&mut session).await.unwrap();

        session.set_attribute("cart", "full").await.unwrap();
        assert!(session.is_dirty());
        let mut before = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(before.get_attribute("cart"), None);

        repo.save(&mut session).await.unwrap();
        let mut after = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(after.get_attribute("cart"), Some(json!("full")));
    }

    #[tokio::test]
    async fn test_null_value_removes_attribute() {
        let repo = repository(FlushMode::Immediate, SaveMode::OnSetAttribute).await;
        let mut session = repo.create_session().await.unwrap();
        session.set_attribute("cart", "full").await.unwrap();

        session.set_attribute("cart", Value::Null).await.unwrap();

        let loaded = repo.get_session(session.id()).await.unwrap().unwrap();
        assert!(loaded.attribute_names().is_empty());
    }

    /// Two copies of one session: the first changes `a`, the second then
    /// saves a change to `b`. Only `Always` writes back its stale `a`.
    async fn stale_write_back(save_mode: SaveMode) -> Value {
        let repo = repository(FlushMode::OnSave, save_mode).await;
        let mut session = repo.create_session().await.unwrap();
        session.set_attribute("a", "x").await.unwrap();
        repo.save(&mut session).await.unwrap();

        let mut first = repo.get_session(session.id()).await.unwrap().unwrap();
        let mut second = repo.get_session(session.id()).await.unwrap().unwrap();

        first.set_attribute("a", "y").await.unwrap();
        repo.save(&mut first).await.unwrap();
        second.set_attribute("b", "z").await.unwrap();
        repo.save(&mut second).await.unwrap();

        let mut stored = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.get_attribute("b"), Some(json!("z")));
        stored.get_attribute("a").unwrap()
    }

    #[tokio::test]
    async fn test_save_mode_always_writes_every_attribute() {
        assert_eq!(stale_write_back(SaveMode::Always).await, json!("x"));
    }

    #[tokio::test]
    async fn test_save_mode_on_set_writes_only_changes() {
        assert_eq!(stale_write_back(SaveMode::OnSetAttribute).await, json!("y"));
    }

    #[tokio::test]
    async fn test_save_mode_on_get_writes_back_reads() {
        let repo = repository(FlushMode::OnSave, SaveMode::OnGetAttribute).await;
        let mut session = repo.create_session().await.unwrap();
        session.set_attribute("a", "x").await.unwrap();
        repo.save(&mut session).await.unwrap();

        let mut loaded = repo.get_session(session.id()).await.unwrap().unwrap();
        assert!(!loaded.is_dirty());
        loaded.get_attribute("a");
        assert!(loaded.is_dirty());
        loaded.get_attribute("missing");

        let version = loaded.version();
        repo.save(&mut loaded).await.unwrap();
        assert_eq!(loaded.version(), version + 1);
    }

    // ============================================================
    // CONFLICT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_recreating_existing_session_conflicts() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        let existing = repo.create_session().await.unwrap();

        let mut duplicate = repo.session_with_id(existing.id());
        let err = duplicate
            .set_attribute("principal", "hazelcast2020")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GridError::SessionConflict("Session already exists".to_string())
        );
        assert_eq!(err.to_string(), "Session already exists");
    }

    #[tokio::test]
    async fn test_concurrent_principal_change_conflicts() {
        let repo = repository(FlushMode::OnSave, SaveMode::OnSetAttribute).await;
        let mut session = repo.create_session().await.unwrap();
        repo.save(&mut session).await.unwrap();

        let mut first = repo.get_session(session.id()).await.unwrap().unwrap();
        let mut second = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(first.version(), second.version());

        first.set_attribute("principal", "alice").await.unwrap();
        second.set_attribute("principal", "mallory").await.unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(matches!(err, GridError::SessionConflict(_)));

        let mut stored = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.get_attribute("principal"), Some(json!("alice")));
    }

    #[tokio::test]
    async fn test_stale_copy_keeps_newer_login_under_save_mode_always() {
        let repo = repository(FlushMode::OnSave, SaveMode::Always).await;
        let mut session = repo.create_session().await.unwrap();
        session.set_attribute("principal", "anonymous").await.unwrap();
        repo.save(&mut session).await.unwrap();

        let mut login = repo.get_session(session.id()).await.unwrap().unwrap();
        let mut stale = repo.get_session(session.id()).await.unwrap().unwrap();

        login.set_attribute("principal", "alice").await.unwrap();
        repo.save(&mut login).await.unwrap();

        stale.set_attribute("theme", "dark").await.unwrap();
        repo.save(&mut stale).await.unwrap();

        let mut stored = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.get_attribute("principal"), Some(json!("alice")));
        assert_eq!(stored.get_attribute("theme"), Some(json!("dark")));

        let found = repo
            .find_by_index("principal", &json!("alice"))
            .await
            .unwrap();
        assert!(found.contains_key(session.id()));
    }

    #[tokio::test]
    async fn test_stale_principal_change_conflicts_under_save_mode_always() {
        let repo = repository(FlushMode::OnSave, SaveMode::Always).await;
        let mut session = repo.create_session().await.unwrap();
        session.set_attribute("principal", "anonymous").await.unwrap();
        repo.save(&mut session).await.unwrap();

        let mut first = repo.get_session(session.id()).await.unwrap().unwrap();
        let mut second = repo.get_session(session.id()).await.unwrap().unwrap();

        first.set_attribute("theme", "dark").await.unwrap();
        repo.save(&mut first).await.unwrap();

        second.remove_attribute("principal").await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(matches!(err, GridError::SessionConflict(_)));

        let mut stored = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.get_attribute("principal"), Some(json!("anonymous")));
    }

    #[tokio::test]
    async fn test_unguarded_attributes_do_not_conflict() {
        let repo = repository(FlushMode::OnSave, SaveMode::OnSetAttribute).await;
        let mut session = repo.create_session().await.unwrap();
        repo.save(&mut session).await.unwrap();

        let mut first = repo.get_session(session.id()).await.unwrap().unwrap();
        let mut second = repo.get_session(session.id()).await.unwrap().unwrap();

        first.set_attribute("theme", "dark").await.unwrap();
        second.set_attribute("lang", "en").await.unwrap();

        repo.save(&mut first).await.unwrap();
        repo.save(&mut second).await.unwrap();

        let stored = repo.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.attribute_names(), vec!["lang", "theme"]);
    }

    // ============================================================
    // EXPIRY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_idle_session_expires_on_read() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        repo.start();
        let mut events = repo.subscribe();

        let mut session = repo.create_session().await.unwrap();
        session
            .set_max_inactive_interval(Duration::from_millis(50))
            .await
            .unwrap();
        let id = session.id().to_string();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(repo.get_session(&id).await.unwrap().is_none());

        let expired = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Expired { id }) => return id,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream closed: {}", e),
                }
            }
        })
        .await
        .expect("expired event");
        assert_eq!(expired, id);
        repo.stop();
    }

    #[tokio::test]
    async fn test_touch_keeps_session_alive() {
        let repo = repository(FlushMode::Immediate, SaveMode::Always).await;
        let mut session = repo.create_session().await.unwrap();
        session
            .set_max_inactive_interval(Duration::from_millis(300))
            .await
            .unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(repo.get_session(session.id()).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_local_expiry_check() {
        let repo = repository(FlushMode::OnSave, SaveMode::Always).await;
        let session = repo.create_session().await.unwrap();
        let created = session.creation_time();

        // Two-minute default: idle for 1:59 is alive, 2:01 is not.
        assert!(!session.is_expired(created + 119_000));
        assert!(session.is_expired(created + 121_000));
    }
}

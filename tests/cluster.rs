//! End-to-end tests: real members on ephemeral ports, gossip over UDP and
//! the data plane over HTTP.

use serde_json::json;
use session_grid::config::{GridConfig, Mode};
use session_grid::error::GridError;
use session_grid::node::GridNode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn config(mode: Mode) -> GridConfig {
    let mut config = GridConfig {
        mode,
        ..GridConfig::default()
    };
    let any_port: SocketAddr = "127.0.0.1:0".parse().unwrap();
    config.membership.gossip_bind = any_port;
    config.membership.http_bind = any_port;
    config.membership.gossip_interval_ms = 50;
    config.membership.suspect_timeout_ms = 1_000;
    config.membership.dead_timeout_ms = 2_000;
    config.membership.join_timeout_ms = 3_000;
    config.membership.view_refresh_ms = 100;
    config.membership.partition_count = 16;
    config.storage.request_timeout_ms = 1_000;
    config.storage.max_attempts = 10;
    config.storage.retry_backoff_ms = 20;
    config
}

async fn founder() -> Arc<GridNode> {
    GridNode::start(config(Mode::Embedded { seeds: vec![] }))
        .await
        .unwrap()
}

async fn joiner(seed: &GridNode) -> Arc<GridNode> {
    let seed_addr = seed.membership().unwrap().local_node.gossip_addr;
    GridNode::start(config(Mode::Embedded {
        seeds: vec![seed_addr],
    }))
    .await
    .unwrap()
}

/// Waits until every node sees `count` members and has applied that view.
async fn wait_for_members(nodes: &[&GridNode], count: usize) {
    for _ in 0..200 {
        let settled = nodes.iter().all(|node| {
            let view = node.current_view();
            view.members.len() == count
                && (node.is_client() || node.map().applied_view_version() >= view.version)
        });
        if settled {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("cluster did not settle on {} members", count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_is_shared_between_members() {
    let a = founder().await;
    let b = joiner(&a).await;
    wait_for_members(&[&a, &b], 2).await;

    // Node A creates the session and logs the user in.
    let mut session = a.sessions().create_session().await.unwrap();
    session
        .set_attribute("principal", "hazelcast2020")
        .await
        .unwrap();
    let id = session.id().to_string();

    // Node B sees it.
    let mut on_b = b.sessions().get_session(&id).await.unwrap().unwrap();
    assert_eq!(on_b.get_attribute("principal"), Some(json!("hazelcast2020")));

    // Node B treating the same id as a brand-new session is refused.
    let mut duplicate = b.repository().session_with_id(&id);
    let err = duplicate
        .set_attribute("principal", "hazelcast2020")
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::SessionConflict(_)));
    assert!(err.to_string().contains("Session already exists"));

    // Either node finds it by principal.
    let found = b
        .sessions()
        .find_by_index("principal", &json!("hazelcast2020"))
        .await
        .unwrap();
    assert!(found.contains_key(&id));

    b.shutdown();
    a.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_mode_reaches_members() {
    let a = founder().await;
    let server = a.http_addr().unwrap();
    let client = GridNode::start(config(Mode::Client {
        servers: vec![server],
    }))
    .await
    .unwrap();
    wait_for_members(&[&a, &client], 1).await;
    assert!(client.is_client());
    assert_eq!(client.map().local_entry_count(), 0);

    let mut session = client.sessions().create_session().await.unwrap();
    session
        .set_attribute("principal", "hazelcast2020")
        .await
        .unwrap();

    let mut on_member = a
        .sessions()
        .get_session(session.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        on_member.get_attribute("principal"),
        Some(json!("hazelcast2020"))
    );
    assert_eq!(client.map().local_entry_count(), 0, "Clients hold no data");

    let mut duplicate = client.repository().session_with_id(session.id());
    let err = duplicate.set_attribute("x", 1).await.unwrap_err();
    assert_eq!(err.to_string(), "Session already exists");

    client.sessions().destroy_session(session.id()).await.unwrap();
    assert!(
        a.sessions()
            .get_session(session.id())
            .await
            .unwrap()
            .is_none()
    );

    client.shutdown();
    a.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_survive_member_departure() {
    let a = founder().await;
    let b = joiner(&a).await;
    wait_for_members(&[&a, &b], 2).await;

    let mut ids = Vec::new();
    for i in 0..10 {
        let mut session = a.sessions().create_session().await.unwrap();
        session.set_attribute("n", i).await.unwrap();
        ids.push(session.id().to_string());
    }
    assert!(
        b.map().local_entry_count() > 0,
        "Some sessions are owned or backed up by B"
    );

    b.leave().await;
    wait_for_members(&[&a], 1).await;

    for (i, id) in ids.iter().enumerate() {
        let mut session = a
            .sessions()
            .get_session(id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("session {} lost", id));
        assert_eq!(session.get_attribute_as::<usize>("n").unwrap(), Some(i));
    }

    a.shutdown();
}

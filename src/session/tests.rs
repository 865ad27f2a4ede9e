//! Session manager tests over an in-memory container runtime.

use crate::container::fake::FakeRuntime;
use crate::env;
use crate::owners::OwnerStore;
use crate::session::{SessionError, SessionManager, SessionManagerConfig, SessionState};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    manager: Arc<SessionManager>,
    runtime: Arc<FakeRuntime>,
    owners: Arc<OwnerStore>,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    fixture_with_ports(env::PORT_RANGE_START, env::PORT_RANGE_END).await
}

async fn fixture_with_ports(start: u16, end: u16) -> Fixture {
    let dir = TempDir::new().unwrap();
    let owners = Arc::new(
        OwnerStore::load(dir.path().join("session_owners.json"))
            .await
            .unwrap(),
    );
    let runtime = Arc::new(FakeRuntime::default());
    let config = SessionManagerConfig {
        data_dir: dir.path().to_path_buf(),
        settle: Duration::ZERO,
        port_range: (start, end),
        // Tests run unprivileged; chown would fail for foreign uids.
        workspace_owner: None,
        ..Default::default()
    };
    let manager = Arc::new(SessionManager::new(
        config,
        runtime.clone(),
        owners.clone(),
    ));
    Fixture {
        manager,
        runtime,
        owners,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_create_for_spawns_ready_session() {
    let fx = fixture().await;

    let session = fx.manager.create_for("alice").await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.host_port >= env::PORT_RANGE_START);
    assert!(session.host_port < env::PORT_RANGE_END);
    assert!(fx.runtime.contains(&session.container_name));
    assert_eq!(fx.runtime.running_count(), 1);
    assert_eq!(fx.owners.get(&session.id).await.as_deref(), Some("alice"));
    assert!(session.workspace.exists());
}

#[tokio::test]
async fn test_quota_refuses_fourth_session() {
    let fx = fixture().await;

    for _ in 0..env::MAX_SESSIONS_PER_USER {
        fx.manager.create_for("alice").await.unwrap();
    }
    let err = fx.manager.create_for("alice").await.unwrap_err();
    assert!(matches!(err, SessionError::QuotaExceeded));

    // A different principal is unaffected.
    fx.manager.create_for("bob").await.unwrap();
    assert_eq!(fx.owners.count_by("alice").await, env::MAX_SESSIONS_PER_USER);
}

#[tokio::test]
async fn test_quota_is_atomic_under_concurrent_creates() {
    let fx = fixture().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = fx.manager.clone();
        handles.push(tokio::spawn(
            async move { manager.create_for("alice").await },
        ));
    }

    let mut ok = 0;
    let mut quota = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(SessionError::QuotaExceeded) => quota += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, env::MAX_SESSIONS_PER_USER);
    assert_eq!(quota, 8 - env::MAX_SESSIONS_PER_USER);
    assert_eq!(fx.owners.count_by("alice").await, env::MAX_SESSIONS_PER_USER);
}

#[tokio::test]
async fn test_get_or_create_is_idempotent_for_live_sessions() {
    let fx = fixture().await;

    let session = fx.manager.create_for("alice").await.unwrap();
    let again = fx.manager.get_or_create(&session.id).await.unwrap();

    assert!(Arc::ptr_eq(&session, &again));
    assert_eq!(fx.runtime.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_create_recreates_dead_container() {
    let fx = fixture().await;

    let session = fx.manager.create_for("alice").await.unwrap();
    fx.runtime.stop(&session.container_name);

    let revived = fx.manager.get_or_create(&session.id).await.unwrap();
    assert_eq!(revived.state(), SessionState::Ready);
    assert_eq!(revived.id, session.id);
    // The stale container was replaced, not reused.
    assert_eq!(fx.runtime.creates.load(Ordering::SeqCst), 2);
    assert_eq!(fx.runtime.running_count(), 1);
}

#[tokio::test]
async fn test_create_failure_rolls_back_everything() {
    let fx = fixture().await;
    fx.runtime.fail_create.store(true, Ordering::SeqCst);

    let err = fx.manager.create_for("alice").await.unwrap_err();
    assert!(matches!(err, SessionError::Runtime(_)));
    assert!(fx.manager.list().is_empty());
    assert_eq!(fx.owners.count_by("alice").await, 0);

    // The reserved port was released and can be handed out again.
    fx.runtime.fail_create.store(false, Ordering::SeqCst);
    let session = fx.manager.create_for("alice").await.unwrap();
    assert_eq!(fx.manager.list().len(), 1);
    assert!(session.host_port >= env::PORT_RANGE_START);
}

#[tokio::test]
async fn test_start_failure_rolls_back() {
    let fx = fixture().await;
    fx.runtime.fail_start.store(true, Ordering::SeqCst);

    let err = fx.manager.create_for("alice").await.unwrap_err();
    assert!(matches!(err, SessionError::Runtime(_)));
    assert!(fx.manager.list().is_empty());
}

#[tokio::test]
async fn test_port_exhaustion_leaves_no_partial_session() {
    let fx = fixture_with_ports(18900, 18902).await;

    fx.manager.create_for("alice").await.unwrap();
    fx.manager.create_for("alice").await.unwrap();

    let err = fx.manager.create_for("alice").await.unwrap_err();
    assert!(matches!(err, SessionError::Ports(_)));
    assert_eq!(fx.manager.list().len(), 2);
    assert_eq!(fx.owners.count_by("alice").await, 2);
}

#[tokio::test]
async fn test_no_two_sessions_share_a_port() {
    let fx = fixture().await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let manager = fx.manager.clone();
        let principal = format!("user{i}");
        handles.push(tokio::spawn(async move {
            manager.create_for(&principal).await.unwrap().host_port
        }));
    }

    let mut ports = Vec::new();
    for handle in handles {
        ports.push(handle.await.unwrap());
    }
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 6, "duplicate host ports were handed out");
}

#[tokio::test]
async fn test_acquire_ref_lifecycle() {
    let fx = fixture().await;

    assert!(matches!(
        fx.manager.acquire_ref("nope"),
        Err(SessionError::NotFound)
    ));

    let session = fx.manager.create_for("alice").await.unwrap();
    let guard = fx.manager.acquire_ref(&session.id).unwrap();
    assert_eq!(session.ref_count(), 1);

    // Non-forced delete is refused while the transport is attached.
    assert!(!fx.manager.delete(&session.id, false).await);
    assert_eq!(session.state(), SessionState::Ready);

    drop(guard);
    assert_eq!(session.ref_count(), 0);
    assert!(fx.manager.delete(&session.id, false).await);
}

#[tokio::test]
async fn test_force_delete_ignores_refs() {
    let fx = fixture().await;

    let session = fx.manager.create_for("alice").await.unwrap();
    let _guard = fx.manager.acquire_ref(&session.id).unwrap();

    assert!(fx.manager.delete(&session.id, true).await);
    assert!(fx.manager.get(&session.id).is_none());
    assert!(matches!(
        fx.manager.acquire_ref(&session.id),
        Err(SessionError::NotFound)
    ));
}

#[tokio::test]
async fn test_double_delete_removes_container_once() {
    let fx = fixture().await;

    let session = fx.manager.create_for("alice").await.unwrap();
    let removes_before = fx.runtime.removes.load(Ordering::SeqCst);

    assert!(fx.manager.delete(&session.id, true).await);
    assert!(!fx.manager.delete(&session.id, true).await);

    assert_eq!(fx.runtime.removes.load(Ordering::SeqCst), removes_before + 1);
    assert_eq!(fx.owners.get(&session.id).await, None);
    assert!(!session.workspace.exists());
}

#[tokio::test]
async fn test_delete_frees_port_for_reuse() {
    let fx = fixture_with_ports(18910, 18911).await;

    let session = fx.manager.create_for("alice").await.unwrap();
    let port = session.host_port;
    assert!(fx.manager.delete(&session.id, false).await);

    let next = fx.manager.create_for("alice").await.unwrap();
    assert_eq!(next.host_port, port);
}

// -- recovery ---------------------------------------------------------------

fn seeded_name(sid: &str) -> String {
    env::container_name_for_session(sid)
}

#[tokio::test]
async fn test_recover_installs_running_container() {
    let fx = fixture().await;
    let sid = "recoverable-session-0001";
    let ws = format!("/data/workspaces/{sid}");
    fx.runtime
        .seed(&seeded_name(sid), true, Some(&ws), Some(17007));

    fx.manager.recover().await;

    let session = fx.manager.get(sid).unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.host_port, 17007);
    assert_eq!(session.workspace, PathBuf::from(ws));

    // The recovered port is marked allocated.
    let fresh = fx.manager.create_for("alice").await.unwrap();
    assert_ne!(fresh.host_port, 17007);
}

#[tokio::test]
async fn test_recover_restarts_stopped_container() {
    let fx = fixture().await;
    let sid = "recoverable-session-0002";
    let ws = format!("/data/workspaces/{sid}");
    fx.runtime
        .seed(&seeded_name(sid), false, Some(&ws), Some(17008));

    fx.manager.recover().await;

    assert!(fx.manager.get(sid).is_some());
    assert_eq!(fx.runtime.running_count(), 1);
}

#[tokio::test]
async fn test_recover_removes_hopeless_containers() {
    let fx = fixture().await;

    // No workspace mount.
    fx.runtime
        .seed("vibe-session-nomount00000", true, None, Some(17009));
    // Workspace names a different session than the container.
    fx.runtime.seed(
        "vibe-session-mismatch0000",
        true,
        Some("/data/workspaces/other-session-entirely00"),
        Some(17010),
    );
    // No port binding.
    let sid = "portless-session-00000003";
    fx.runtime
        .seed(&seeded_name(sid), true, Some(&format!("/data/workspaces/{sid}")), None);
    // Stopped and refuses to start.
    fx.runtime.fail_start.store(true, Ordering::SeqCst);
    let dead = "deadstart-session-000004";
    fx.runtime.seed(
        &seeded_name(dead),
        false,
        Some(&format!("/data/workspaces/{dead}")),
        Some(17011),
    );

    fx.manager.recover().await;

    assert!(fx.manager.list().is_empty());
    assert!(!fx.runtime.contains("vibe-session-nomount00000"));
    assert!(!fx.runtime.contains("vibe-session-mismatch0000"));
    assert!(!fx.runtime.contains(&seeded_name(sid)));
    assert!(!fx.runtime.contains(&seeded_name(dead)));
}

#[tokio::test]
async fn test_recover_twice_is_a_noop() {
    let fx = fixture().await;
    let sid = "recoverable-session-0005";
    let ws = format!("/data/workspaces/{sid}");
    fx.runtime
        .seed(&seeded_name(sid), true, Some(&ws), Some(17012));

    fx.manager.recover().await;
    let creates = fx.runtime.creates.load(Ordering::SeqCst);
    let removes = fx.runtime.removes.load(Ordering::SeqCst);
    let first = fx.manager.get(sid).unwrap();

    fx.manager.recover().await;
    assert!(Arc::ptr_eq(&first, &fx.manager.get(sid).unwrap()));
    assert_eq!(fx.runtime.creates.load(Ordering::SeqCst), creates);
    assert_eq!(fx.runtime.removes.load(Ordering::SeqCst), removes);
}

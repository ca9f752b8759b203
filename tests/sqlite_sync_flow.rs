mod common;

use common::{eventually, likes_of, photo, setup, test_config, wait_for_push, EVENT};
use photowall_sync::application::ports::ReplayQueue;
use photowall_sync::{AppError, SessionScope, SyncConfig, SyncState};
use std::time::Duration;
use tokio::time::sleep;

fn scope() -> SessionScope {
    SessionScope::new(EVENT).expect("scope")
}

#[tokio::test]
async fn like_burst_is_reconciled_with_one_read() {
    let ctx = setup(SyncConfig {
        batch_window_ms: 500,
        ..test_config()
    })
    .await;
    ctx.backend.insert_photo(&photo("p1", 100)).await.expect("insert");

    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    for _ in 0..5 {
        ctx.backend.add_like("p1").await.expect("like");
    }

    assert!(
        eventually(&ctx.coordinator, Duration::from_secs(3), |s| {
            likes_of(s, "p1") == Some(5)
        })
        .await
    );
    sleep(Duration::from_millis(600)).await;

    assert_eq!(ctx.counters.calls(), 1);
    assert_eq!(ctx.counters.ids_requested(), 1);
    assert_eq!(ctx.coordinator.snapshot().await.len(), 1);
}

#[tokio::test]
async fn photo_lifecycle_flows_into_the_store() {
    let ctx = setup(test_config()).await;
    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    ctx.backend.insert_photo(&photo("a", 10)).await.expect("insert a");
    ctx.backend.insert_photo(&photo("b", 20)).await.expect("insert b");

    let mut captioned = photo("a", 10);
    captioned.caption = Some("toast".to_string());
    captioned.tags = vec!["speech".to_string()];
    ctx.backend
        .update_photo_metadata(&captioned)
        .await
        .expect("update");

    assert!(
        eventually(&ctx.coordinator, Duration::from_secs(3), |s| {
            s.len() == 2 && s[1].caption.as_deref() == Some("toast")
        })
        .await
    );
    let snapshot = ctx.coordinator.snapshot().await;
    assert_eq!(snapshot[0].id, "b");
    assert_eq!(snapshot[1].tags, vec!["speech".to_string()]);

    ctx.backend.delete_photo("b").await.expect("delete");
    assert!(eventually(&ctx.coordinator, Duration::from_secs(3), |s| s.len() == 1).await);
}

#[tokio::test]
async fn delete_wins_over_pending_like_reconcile() {
    let ctx = setup(SyncConfig {
        batch_window_ms: 300,
        ..test_config()
    })
    .await;
    ctx.backend.insert_photo(&photo("p1", 1)).await.expect("insert");
    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    ctx.backend.add_like("p1").await.expect("like");
    ctx.backend.delete_photo("p1").await.expect("delete");

    assert!(eventually(&ctx.coordinator, Duration::from_secs(3), |s| s.is_empty()).await);
    sleep(Duration::from_millis(500)).await;

    assert!(ctx.coordinator.snapshot().await.is_empty());
    assert_eq!(ctx.counters.calls(), 0);
}

#[tokio::test]
async fn replayed_photo_insert_keeps_reconciled_likes() {
    let ctx = setup(test_config()).await;
    // 有効化前の INSERT は change_log に未処理のまま残り、ポーラーが後から再生する
    ctx.backend.insert_photo(&photo("p1", 1)).await.expect("insert");
    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    for _ in 0..3 {
        ctx.backend.add_like("p1").await.expect("like");
    }
    assert!(
        eventually(&ctx.coordinator, Duration::from_secs(3), |s| {
            likes_of(s, "p1") == Some(3)
        })
        .await
    );

    sleep(Duration::from_millis(2_500)).await;
    assert!(ctx.coordinator.metrics().replayed >= 1);
    assert_eq!(likes_of(&ctx.coordinator.snapshot().await, "p1"), Some(3));
}

#[tokio::test]
async fn poller_replays_changes_missed_by_push() {
    let ctx = setup(test_config()).await;
    ctx.backend.insert_photo(&photo("p1", 1)).await.expect("insert");
    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    ctx.backend.feed().set_delivery_enabled(false);
    ctx.backend.insert_photo(&photo("p2", 2)).await.expect("insert");
    ctx.backend.add_like("p1").await.expect("like");

    assert!(
        eventually(&ctx.coordinator, Duration::from_secs(4), |s| {
            s.len() == 2 && likes_of(s, "p1") == Some(1)
        })
        .await
    );
    assert!(ctx.coordinator.metrics().replayed >= 2);

    // 再生済みの通知は二度と返らない
    sleep(Duration::from_millis(100)).await;
    let pending = ctx
        .backend
        .poll_unprocessed(&scope())
        .await
        .expect("poll");
    assert!(pending.is_empty());
}

#[tokio::test]
async fn pushed_notifications_are_not_replayed_again() {
    let ctx = setup(test_config()).await;
    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    ctx.backend.insert_photo(&photo("p1", 1)).await.expect("insert");
    assert!(eventually(&ctx.coordinator, Duration::from_secs(2), |s| s.len() == 1).await);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(ctx.coordinator.metrics().replayed, 0);
}

#[tokio::test]
async fn load_more_merges_every_page_once() {
    let ctx = setup(test_config()).await;
    for i in 1..=100 {
        ctx.backend
            .insert_photo(&photo(&format!("p{i:03}"), i))
            .await
            .expect("insert");
    }

    ctx.coordinator.activate(scope()).await.expect("activate");
    assert_eq!(ctx.coordinator.snapshot().await.len(), 50);

    let outcome = ctx.coordinator.load_more().await.expect("load more");
    assert_eq!(outcome.page, Some(2));
    assert_eq!(outcome.added, 50);
    assert!(!outcome.has_more);

    let snapshot = ctx.coordinator.snapshot().await;
    assert_eq!(snapshot.len(), 100);
    assert_eq!(snapshot.first().map(|p| p.id.as_str()), Some("p100"));
    assert_eq!(snapshot.last().map(|p| p.id.as_str()), Some("p001"));
}

#[tokio::test]
async fn switching_events_never_leaks_entities() {
    let ctx = setup(test_config()).await;
    ctx.backend.insert_photo(&photo("a1", 1)).await.expect("insert");
    ctx.backend
        .insert_photo(&photowall_sync::Photo::new("b1", "u", 2).with_event("other-event"))
        .await
        .expect("insert");

    ctx.coordinator.activate(scope()).await.expect("activate");
    wait_for_push(&ctx.coordinator).await;

    let other = SessionScope::new("other-event").expect("scope");
    ctx.coordinator.activate(other.clone()).await.expect("switch");
    assert_eq!(ctx.coordinator.state(), SyncState::Live(other));
    wait_for_push(&ctx.coordinator).await;

    ctx.backend.insert_photo(&photo("a2", 3)).await.expect("insert");
    sleep(Duration::from_millis(300)).await;

    let ids: Vec<_> = ctx
        .coordinator
        .snapshot()
        .await
        .iter()
        .map(|p| p.id.clone())
        .collect();
    assert_eq!(ids, vec!["b1".to_string()]);

    ctx.coordinator.deactivate().await;
    assert_eq!(ctx.coordinator.state(), SyncState::Idle);
    assert!(ctx.coordinator.snapshot().await.is_empty());
    assert!(matches!(
        ctx.coordinator.load_more().await,
        Err(AppError::InvalidState(_))
    ));
}

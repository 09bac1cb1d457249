mod common;

use chrono::Duration;
use common::{APP, BOARD, board, harness, key};
use std::time::Duration as StdDuration;
use tether_core::adapter::remote::paths;
use tether_core::adapter::{BoardStore, Method, StorageStore};
use tether_core::model::{SemVer, StorageItem, VersionType};
use tether_core::resources::BoardService;
use tether_core::sync::CacheEvent;

#[tokio::test]
async fn remote_wins_after_a_background_reconciliation() {
    let h = harness();
    h.age(Duration::minutes(5));
    h.remote.respond(Method::Get, &paths::board(APP, BOARD), &board(BOARD, "Renamed remotely", &h.clock));
    let mut events = h.engine.cache().subscribe(BoardService::cache_key(&key(), None));

    let fetched = h.engine.boards().get_board(&key(), None).await.expect("read");
    assert_eq!(fetched.body.name, "Main");

    h.engine.shutdown().await;
    let stored = h.local.get_board(&key(), None).await.expect("local");
    assert_eq!(stored.body.name, "Renamed remotely");
    assert_eq!(
        events.try_recv(),
        Some(CacheEvent::Updated(BoardService::cache_key(&key(), None)))
    );
}

#[tokio::test]
async fn only_updated_at_differences_are_not_written_back() {
    let h = harness();
    h.age(Duration::hours(1));
    h.remote.respond(Method::Get, &paths::board(APP, BOARD), &board(BOARD, "Main", &h.clock));

    h.engine.boards().get_board(&key(), None).await.expect("read");
    h.engine.shutdown().await;
    assert_eq!(h.local.calls("upsert_board"), 0);
}

#[tokio::test]
async fn pinned_reads_never_write_back() {
    let h = harness();
    let v = h
        .local
        .create_board_version(&key(), VersionType::Major)
        .await
        .expect("version");
    assert_eq!(v, SemVer::new(1, 0, 0));
    let pinned_path = paths::with_version(paths::board(APP, BOARD), Some(v));
    h.remote.respond(Method::Get, &pinned_path, &board(BOARD, "Different", &h.clock));

    let read = h.engine.boards().get_board(&key(), Some(v)).await.expect("read");
    h.engine.shutdown().await;

    assert_eq!(read.body.name, "Main");
    assert_eq!(h.remote.requests_to(Method::Get, &pinned_path).len(), 1);
    assert_eq!(h.local.calls("upsert_board"), 0);
}

#[tokio::test(start_paused = true)]
async fn local_value_is_returned_while_the_remote_hangs() {
    let h = harness();
    h.remote.set_hang(true);

    let read = tokio::time::timeout(StdDuration::from_secs(1), h.engine.boards().get_board(&key(), None))
        .await
        .expect("read must not wait for the remote")
        .expect("read");
    assert_eq!(read.body.name, "Main");
    assert_eq!(h.engine.pending_background(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_write_backs() {
    let h = harness();
    h.remote.set_latency(Some(StdDuration::from_secs(30)));
    h.remote.respond(Method::Get, &paths::board(APP, BOARD), &board(BOARD, "Late", &h.clock));

    h.engine.boards().get_board(&key(), None).await.expect("read");
    assert_eq!(h.local.get_board(&key(), None).await.expect("local").body.name, "Main");

    h.engine.shutdown().await;
    assert_eq!(h.engine.pending_background(), 0);
    assert_eq!(h.local.get_board(&key(), None).await.expect("local").body.name, "Late");
}

#[tokio::test]
async fn offline_reads_never_touch_the_remote() {
    let h = harness();
    h.go_offline();
    h.engine.boards().get_board(&key(), None).await.expect("read");
    h.engine.boards().get_boards(APP).await.expect("read");
    h.engine.shutdown().await;
    assert!(h.remote.requests().is_empty());
}

#[tokio::test]
async fn collection_reads_pull_in_remote_only_items() {
    let h = harness();
    h.remote.respond(
        Method::Get,
        &paths::boards(APP),
        &vec![board(BOARD, "Main", &h.clock), board("board2", "Second", &h.clock)],
    );

    let boards = h.engine.boards().get_boards(APP).await.expect("read");
    assert_eq!(boards.len(), 1);
    h.engine.shutdown().await;

    let stored = h.local.get_boards(APP).await.expect("local");
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|b| b.id == "board2"));
}

#[tokio::test]
async fn storage_listing_follows_the_remote() {
    let h = harness();
    let item = StorageItem {
        location: "uploads/a.png".to_string(),
        size: 12,
        last_modified: chrono::Utc::now(),
        e_tag: None,
    };
    h.remote.respond(Method::Post, &paths::data_list(APP), &vec![item.clone()]);

    let listing = h.engine.storage().list_storage_items(APP, "uploads/").await.expect("list");
    assert!(listing.items.is_empty());
    h.engine.shutdown().await;

    let stored = h.local.list_storage(APP, "uploads/").await.expect("local");
    assert_eq!(stored.items, vec![item]);
}

#[tokio::test]
async fn fetched_values_refetch_and_subscribe() {
    let h = harness();
    let fetched = h.engine.fetch_board(&key(), None).await.expect("fetch");
    assert_eq!(fetched.value.body.name, "Main");
    assert_eq!(fetched.key(), &BoardService::cache_key(&key(), None));

    let mut events = fetched.subscribe();
    h.remote.respond(Method::Put, &paths::board(APP, BOARD), &serde_json::json!({"id": BOARD}));
    h.engine
        .boards()
        .upsert_board(
            APP,
            BOARD,
            tether_core::model::BoardDraft {
                name: "Edited".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("upsert");
    assert!(matches!(events.try_recv(), Some(CacheEvent::Invalidated(_))));

    h.go_offline();
    let again = fetched.refetch().await.expect("refetch");
    assert_eq!(again.body.name, "Edited");
}

use super::*;
use crate::frame::{Frame, Status};
use crate::primitive::Shape;
use crate::state::test_helpers::{presence, rect_primitive};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

async fn join(board: &Board, session_id: &str) -> (ConnectionId, mpsc::Receiver<Frame>, SyncPayload) {
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(64);
    let sync = board
        .join(connection_id, presence(session_id, session_id), tx)
        .await;
    (connection_id, rx, sync)
}

fn rect_x(board_state: &BoardState, id: &str) -> Option<f64> {
    match board_state.primitives.get(id).map(|p| &p.shape) {
        Some(Shape::Rect(r)) => Some(r.x),
        _ => None,
    }
}

// =============================================================================
// join / part
// =============================================================================

#[tokio::test]
async fn join_returns_snapshot_and_announces_to_peers() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");

    let (_b, mut rx_b, sync) = join(&board, "bob").await;
    assert_eq!(sync.primitives.len(), 1);
    assert_eq!(sync.primitives[0].id, "r1");
    let mut sessions: Vec<&str> = sync
        .presence
        .iter()
        .map(|p| p.session_id.as_str())
        .collect();
    sessions.sort_unstable();
    assert_eq!(sessions, ["alice", "bob"]);

    let joined = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(joined.syscall, frame::PRESENCE_JOINED);
    assert_eq!(joined.data.get("sessionId"), Some(&json!("bob")));
    assert_eq!(joined.board_id.as_deref(), Some("b1"));

    // The joiner is not told about its own arrival.
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn part_removes_presence_and_notifies_remaining() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;

    assert_eq!(board.part(a).await.as_deref(), Some("alice"));

    let left = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(left.syscall, frame::PRESENCE_LEFT);
    assert_eq!(left.data.get("sessionId"), Some(&json!("alice")));

    let sync = board.snapshot().await;
    assert_eq!(sync.presence.len(), 1);
    assert_eq!(sync.presence[0].session_id, "bob");
}

#[tokio::test]
async fn part_of_unknown_connection_is_noop() {
    let board = Board::new("b1", 100);
    let (_a, mut rx_a, _) = join(&board, "alice").await;
    assert!(board.part(Uuid::new_v4()).await.is_none());
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn stale_connection_part_keeps_reconnected_session() {
    let board = Board::new("b1", 100);
    let (old, _rx_old, _) = join(&board, "alice").await;
    let (_new, _rx_new, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;

    assert!(board.part(old).await.is_none(), "session still held by the newer connection");
    assert_channel_empty(&mut rx_b).await;
    assert_eq!(board.snapshot().await.presence.len(), 2);
}

#[tokio::test]
async fn idle_since_tracks_connection_count() {
    let board = Board::new("b1", 100);
    assert!(board.lock().await.idle_since.is_some());

    let (a, _rx, _) = join(&board, "alice").await;
    assert!(board.lock().await.idle_since.is_none());

    board.part(a).await;
    assert!(board.lock().await.idle_since.is_some());
}

// =============================================================================
// primitive mutations
// =============================================================================

#[tokio::test]
async fn create_fans_out_to_peers_only() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    drain(&mut rx_a);

    board
        .create_primitive(a, rect_primitive("r1", 1.0, 2.0))
        .await
        .expect("create");

    let event = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(event.syscall, frame::PRIMITIVE_CREATE);
    assert_eq!(event.status, Status::Request);
    assert_eq!(event.from.as_deref(), Some("alice"));
    assert_eq!(event.data.get("id"), Some(&json!("r1")));
    assert_eq!(event.data.get("type"), Some(&json!("rect")));
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn duplicate_create_is_rejected_without_fanout() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    drain(&mut rx_b);

    let err = board
        .create_primitive(a, rect_primitive("r1", 5.0, 5.0))
        .await
        .unwrap_err();
    assert_eq!(err, PrimitiveError::DuplicateId("r1".into()));
    assert_channel_empty(&mut rx_b).await;
    assert_eq!(board.lock().await.history.undo_len(), 1);
}

#[tokio::test]
async fn update_broadcasts_merged_fields() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    drain(&mut rx_b);

    board
        .update_primitive(a, "r1", json!({"x": 10.0}))
        .await
        .expect("update");

    let event = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(event.syscall, frame::PRIMITIVE_UPDATE);
    assert_eq!(event.data.get("id"), Some(&json!("r1")));
    let changes = event.data.get("changes").expect("changes");
    assert_eq!(changes["x"], json!(10.0));
    assert_eq!(changes["width"], json!(100.0));
    assert!(changes.get("type").is_none());
}

#[tokio::test]
async fn update_and_delete_of_missing_primitive_are_not_found() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;

    assert!(matches!(
        board.update_primitive(a, "ghost", json!({"x": 1.0})).await,
        Err(PrimitiveError::NotFound(_))
    ));
    assert!(matches!(board.delete_primitive(a, "ghost").await, Err(PrimitiveError::NotFound(_))));
    assert_channel_empty(&mut rx_b).await;
    assert_eq!(board.lock().await.history.undo_len(), 0);
}

#[tokio::test]
async fn delete_hides_primitive_from_late_joiner() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    board.delete_primitive(a, "r1").await.expect("delete");

    let (_c, _rx_c, sync) = join(&board, "carol").await;
    assert!(sync.primitives.is_empty());
}

// =============================================================================
// undo / redo
// =============================================================================

#[tokio::test]
async fn undo_of_create_deletes_for_everyone() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    drain(&mut rx_a);
    drain(&mut rx_b);

    board.undo().await.expect("undo");

    for rx in [&mut rx_a, &mut rx_b] {
        let event = assert_channel_has_frame(rx).await;
        assert_eq!(event.syscall, frame::PRIMITIVE_DELETE);
        assert_eq!(event.data.get("id"), Some(&json!("r1")));
    }
    assert!(board.snapshot().await.primitives.is_empty());
}

#[tokio::test]
async fn undo_of_update_restores_and_redo_reapplies() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    board
        .update_primitive(a, "r1", json!({"x": 10.0}))
        .await
        .expect("update");
    drain(&mut rx_a);

    board.undo().await.expect("undo");
    assert_eq!(rect_x(&*board.lock().await, "r1"), Some(0.0));
    let event = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(event.syscall, frame::PRIMITIVE_UPDATE);
    assert_eq!(event.data["changes"]["x"], json!(0.0));

    board.redo().await.expect("redo");
    assert_eq!(rect_x(&*board.lock().await, "r1"), Some(10.0));
    let event = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(event.data["changes"]["x"], json!(10.0));
}

#[tokio::test]
async fn undo_of_delete_restores_original_position() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    for id in ["r1", "r2", "r3"] {
        board
            .create_primitive(a, rect_primitive(id, 0.0, 0.0))
            .await
            .expect("create");
    }
    board.delete_primitive(a, "r2").await.expect("delete");
    drain(&mut rx_a);

    board.undo().await.expect("undo");
    let event = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(event.syscall, frame::PRIMITIVE_CREATE);
    assert_eq!(event.data.get("id"), Some(&json!("r2")));

    let ids: Vec<String> = board
        .snapshot()
        .await
        .primitives
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, ["r1", "r2", "r3"]);
}

#[tokio::test]
async fn undo_on_empty_history_publishes_nothing() {
    let board = Board::new("b1", 100);
    let (_a, mut rx_a, _) = join(&board, "alice").await;
    assert_eq!(board.undo().await, Err(HistoryError::NothingToUndo));
    assert_eq!(board.redo().await, Err(HistoryError::NothingToRedo));
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn undo_all_then_redo_all_restores_order() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let ids = ["p0", "p1", "p2", "p3", "p4"];
    for id in ids {
        board
            .create_primitive(a, rect_primitive(id, 0.0, 0.0))
            .await
            .expect("create");
    }

    for _ in ids {
        board.undo().await.expect("undo");
    }
    assert!(board.snapshot().await.primitives.is_empty());

    for _ in ids {
        board.redo().await.expect("redo");
    }
    let restored: Vec<String> = board
        .snapshot()
        .await
        .primitives
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(restored, ids);
}

#[tokio::test]
async fn new_mutation_after_undo_discards_redo() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    board.undo().await.expect("undo");
    board
        .create_primitive(a, rect_primitive("r2", 0.0, 0.0))
        .await
        .expect("create");

    assert_eq!(board.redo().await, Err(HistoryError::NothingToRedo));
}

#[tokio::test]
async fn rejected_updates_keep_redo_chain() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    for id in ["r1", "r2"] {
        board
            .create_primitive(a, rect_primitive(id, 0.0, 0.0))
            .await
            .expect("create");
    }
    board.undo().await.expect("undo r2");
    drain(&mut rx_b);

    for changes in [json!({"type": "ellipse"}), json!({"X": 10.0}), json!({})] {
        assert!(matches!(
            board.update_primitive(a, "r1", changes).await,
            Err(PrimitiveError::MalformedChanges { .. })
        ));
    }
    assert_channel_empty(&mut rx_b).await;
    {
        let st = board.lock().await;
        assert_eq!(st.history.undo_len(), 1);
        assert_eq!(st.history.redo_len(), 1);
    }

    board.redo().await.expect("redo r2");
    assert_eq!(board.snapshot().await.primitives.len(), 2);
}

#[tokio::test]
async fn update_to_current_values_is_not_recorded() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    board
        .create_primitive(a, rect_primitive("r1", 5.0, 0.0))
        .await
        .expect("create");
    drain(&mut rx_b);

    board
        .update_primitive(a, "r1", json!({"x": 5.0}))
        .await
        .expect("update");
    assert_channel_empty(&mut rx_b).await;
    assert_eq!(board.lock().await.history.undo_len(), 1);
}

#[tokio::test]
async fn undo_is_shared_across_users() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    let (b, _rx_b, _) = join(&board, "bob").await;
    board
        .create_primitive(a, rect_primitive("mine", 0.0, 0.0))
        .await
        .expect("create");
    board
        .create_primitive(b, rect_primitive("theirs", 0.0, 0.0))
        .await
        .expect("create");

    // Alice's undo reverts Bob's most recent create.
    board.undo().await.expect("undo");
    let ids: Vec<String> = board
        .snapshot()
        .await
        .primitives
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, ["mine"]);
}

#[tokio::test]
async fn undo_of_update_on_deleted_primitive_is_silent() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    board
        .update_primitive(a, "r1", json!({"x": 10.0}))
        .await
        .expect("update");
    board.delete_primitive(a, "r1").await.expect("delete");

    // Undo delete, then undo update: the restored record sees the old x.
    board.undo().await.expect("undo delete");
    board.undo().await.expect("undo update");
    assert_eq!(rect_x(&*board.lock().await, "r1"), Some(0.0));

    // An update entry whose target has since been deleted.
    drain(&mut rx_a);
    let mut st = board.lock().await;
    st.primitives.soft_delete("r1").expect("delete");
    st.history.record(HistoryEntry::Update {
        id: "r1".into(),
        before: rect_primitive("r1", 5.0, 0.0).shape,
        after: rect_primitive("r1", 6.0, 0.0).shape,
    });
    drop(st);

    board.undo().await.expect("undo on deleted target");
    assert_channel_empty(&mut rx_a).await;
    let st = board.lock().await;
    let record = st.primitives.record("r1").expect("record kept");
    assert!(!record.is_live());
    assert_eq!(record.primitive.shape, rect_primitive("r1", 5.0, 0.0).shape);
}

#[tokio::test]
async fn history_target_missing_is_reported() {
    let board = Board::new("b1", 100);
    board
        .lock()
        .await
        .history
        .record(HistoryEntry::Create("ghost".into()));
    assert_eq!(board.undo().await, Err(HistoryError::TargetMissing("ghost".into())));
    {
        let st = board.lock().await;
        assert_eq!(st.history.undo_len(), 1);
        assert_eq!(st.history.redo_len(), 0);
    }
}

#[tokio::test]
async fn failed_redo_keeps_entry_on_redo_stack() {
    let board = Board::new("b1", 100);
    let (a, _rx_a, _) = join(&board, "alice").await;
    board
        .create_primitive(a, rect_primitive("r1", 0.0, 0.0))
        .await
        .expect("create");
    board
        .delete_primitive(a, "r1")
        .await
        .expect("delete");
    board.undo().await.expect("undo delete");
    // Deleted again outside history, so redoing the delete has no target.
    board.lock().await.primitives.soft_delete("r1").expect("delete");

    assert_eq!(board.redo().await, Err(HistoryError::TargetMissing("r1".into())));
    let st = board.lock().await;
    assert_eq!(st.history.undo_len(), 1);
    assert_eq!(st.history.redo_len(), 1);
}

// =============================================================================
// presence + cursors
// =============================================================================

#[tokio::test]
async fn cursor_goes_to_peers_with_session_id() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    drain(&mut rx_a);

    board.move_cursor(a, 12.5, 40.0).await;

    let event = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(event.syscall, frame::CURSOR_MOVE);
    assert_eq!(event.data.get("sessionId"), Some(&json!("alice")));
    assert_eq!(event.data.get("x"), Some(&json!(12.5)));
    assert_channel_empty(&mut rx_a).await;

    let st = board.lock().await;
    assert_eq!(st.history.undo_len(), 0);
    assert!(!st.primitives.has_dirty());
}

#[tokio::test]
async fn cursor_from_unbound_connection_is_dropped() {
    let board = Board::new("b1", 100);
    let (_a, mut rx_a, _) = join(&board, "alice").await;
    board.move_cursor(Uuid::new_v4(), 1.0, 1.0).await;
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn rename_goes_to_everyone_including_sender() {
    let board = Board::new("b1", 100);
    let (a, mut rx_a, _) = join(&board, "alice").await;
    let (_b, mut rx_b, _) = join(&board, "bob").await;
    drain(&mut rx_a);

    let patch = PresencePatch { name: Some("Alice L.".into()), color: None };
    let updated = board
        .update_presence(a, frame::PRESENCE_RENAME, patch)
        .await
        .expect("known session");
    assert_eq!(updated.name, "Alice L.");

    for rx in [&mut rx_a, &mut rx_b] {
        let event = assert_channel_has_frame(rx).await;
        assert_eq!(event.syscall, frame::PRESENCE_RENAME);
        assert_eq!(event.data.get("sessionId"), Some(&json!("alice")));
        assert_eq!(event.data.get("name"), Some(&json!("Alice L.")));
        assert!(!event.data.contains_key("color"));
    }
}

// =============================================================================
// ordering
// =============================================================================

#[tokio::test]
async fn concurrent_creates_reach_everyone_in_application_order() {
    let board = std::sync::Arc::new(Board::new("b1", 1000));
    let (_watcher, mut rx, _) = join(&board, "watcher").await;

    let mut handles = Vec::new();
    for writer in 0..4 {
        let board = board.clone();
        handles.push(tokio::spawn(async move {
            let connection_id = Uuid::new_v4();
            let (tx, _rx) = mpsc::channel(256);
            board
                .join(connection_id, presence(&format!("w{writer}"), "w"), tx)
                .await;
            for i in 0..10 {
                let id = format!("w{writer}-{i}");
                board
                    .create_primitive(connection_id, rect_primitive(&id, 0.0, 0.0))
                    .await
                    .expect("create");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("writer task");
    }

    let created: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter(|f| f.syscall == frame::PRIMITIVE_CREATE)
        .filter_map(|f| f.data.get("id").and_then(|v| v.as_str()).map(str::to_owned))
        .collect();
    let snapshot: Vec<String> = board
        .snapshot()
        .await
        .primitives
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(created.len(), 40);
    assert_eq!(created, snapshot);
}

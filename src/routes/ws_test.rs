use super::*;
use crate::frame::Status;
use crate::state::test_helpers;
use serde_json::json;
use tokio::time::{Duration, timeout};

fn request_text(syscall: &str, data: Data) -> String {
    let req = Frame::request(syscall, data);
    serde_json::to_string(&req).expect("serialize request")
}

fn begin_value(x: f64, y: f64) -> serde_json::Value {
    json!({"type": "begin", "offsetX": x, "offsetY": y, "brushSize": 5.0, "brushColor": "#000000"})
}

async fn recv_relay(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("relay receive timed out")
        .expect("relay channel closed")
}

/// Drive one inbound frame through dispatch for a connection.
async fn dispatch(
    state: &AppState,
    current_room: &mut Option<String>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    process_inbound_text(state, current_room, client_id, client_tx, text).await
}

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let (state, _store) = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let replies = dispatch(&state, &mut room, Uuid::new_v4(), &tx, "{not json").await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, "gateway:error");
}

#[tokio::test]
async fn unknown_prefix_yields_error_frame() {
    let (state, _store) = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let replies = dispatch(
        &state,
        &mut room,
        Uuid::new_v4(),
        &tx,
        &request_text("cursor:move", Data::new()),
    )
    .await;

    assert_eq!(replies[0].status, Status::Error);
}

#[tokio::test]
async fn join_without_room_id_errors() {
    let (state, _store) = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let replies = dispatch(
        &state,
        &mut room,
        Uuid::new_v4(),
        &tx,
        &request_text("room:join", Data::new()),
    )
    .await;

    assert_eq!(replies[0].status, Status::Error);
    assert!(room.is_none());
}

/// Joining an unknown room replies with an empty snapshot (Scenario D seen
/// from the wire).
#[tokio::test]
async fn join_replies_with_snapshot() {
    let (state, _store) = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let mut data = Data::new();
    data.insert("room_id".into(), json!("r2"));
    let replies = dispatch(
        &state,
        &mut room,
        Uuid::new_v4(),
        &tx,
        &request_text("room:join", data),
    )
    .await;

    assert_eq!(replies[0].status, Status::Done);
    assert_eq!(replies[0].data.get("actions"), Some(&json!([])));
    assert_eq!(room.as_deref(), Some("r2"));
}

#[tokio::test]
async fn join_honors_room_id_frame_field() {
    let (state, _store) = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let req = Frame::request("room:join", Data::new()).with_room_id("lobby");
    let text = serde_json::to_string(&req).expect("serialize");
    let replies = dispatch(&state, &mut room, Uuid::new_v4(), &tx, &text).await;

    assert_eq!(replies[0].status, Status::Done);
    assert_eq!(room.as_deref(), Some("lobby"));
}

#[tokio::test]
async fn draw_before_join_errors() {
    let (state, _store) = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let mut data = Data::new();
    data.insert("action".into(), begin_value(1.0, 1.0));
    let replies = dispatch(
        &state,
        &mut room,
        Uuid::new_v4(),
        &tx,
        &request_text("draw:append", data),
    )
    .await;

    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(
        replies[0].data.get("message").and_then(|v| v.as_str()),
        Some("must join a room first")
    );
}

#[tokio::test]
async fn append_acks_sender_and_relays_to_peer() {
    let (state, _store) = test_helpers::test_app_state();
    let sender = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let (sender_tx, mut sender_rx) = mpsc::channel(8);
    let mut room = None;

    let mut join_data = Data::new();
    join_data.insert("room_id".into(), json!("r1"));
    dispatch(&state, &mut room, sender, &sender_tx, &request_text("room:join", join_data)).await;

    let mut peer_rx = test_helpers::attach_client(&state, "r1", peer).await;

    let mut data = Data::new();
    data.insert("action".into(), begin_value(5.0, 5.0));
    let replies = dispatch(
        &state,
        &mut room,
        sender,
        &sender_tx,
        &request_text("draw:append", data),
    )
    .await;

    assert_eq!(replies[0].status, Status::Done);

    let relayed = recv_relay(&mut peer_rx).await;
    assert_eq!(relayed.syscall, "draw:append");
    assert_eq!(relayed.status, Status::Request);
    assert!(relayed.parent_id.is_none(), "peers did not originate the exchange");

    // The sender's own relay channel stays quiet.
    assert!(
        timeout(Duration::from_millis(80), sender_rx.recv()).await.is_err(),
        "sender must not receive its own append"
    );
}

#[tokio::test]
async fn append_with_malformed_action_errors() {
    let (state, _store) = test_helpers::test_app_state();
    let sender = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let mut join_data = Data::new();
    join_data.insert("room_id".into(), json!("r1"));
    dispatch(&state, &mut room, sender, &tx, &request_text("room:join", join_data)).await;

    let mut data = Data::new();
    data.insert("action".into(), json!({"type": "wiggle"}));
    let replies = dispatch(&state, &mut room, sender, &tx, &request_text("draw:append", data)).await;

    assert_eq!(replies[0].status, Status::Error);
}

#[tokio::test]
async fn undo_and_redo_round_trip_over_dispatch() {
    let (state, _store) = test_helpers::test_app_state();
    let sender = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let mut join_data = Data::new();
    join_data.insert("room_id".into(), json!("r1"));
    dispatch(&state, &mut room, sender, &tx, &request_text("room:join", join_data)).await;
    let mut peer_rx = test_helpers::attach_client(&state, "r1", peer).await;

    let mut data = Data::new();
    data.insert("action".into(), begin_value(5.0, 5.0));
    dispatch(&state, &mut room, sender, &tx, &request_text("draw:append", data)).await;
    recv_relay(&mut peer_rx).await;

    let replies = dispatch(&state, &mut room, sender, &tx, &request_text("draw:undo", Data::new())).await;
    assert_eq!(replies[0].status, Status::Done);
    let undo_signal = recv_relay(&mut peer_rx).await;
    assert_eq!(undo_signal.syscall, "draw:undo");
    assert!(undo_signal.data.is_empty());

    let replies = dispatch(&state, &mut room, sender, &tx, &request_text("draw:redo", Data::new())).await;
    assert_eq!(replies[0].status, Status::Done);
    let redo_signal = recv_relay(&mut peer_rx).await;
    assert_eq!(redo_signal.syscall, "draw:redo");
    let stroke = redo_signal.data.get("stroke").expect("stroke payload");
    assert_eq!(stroke.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn rejoining_another_room_leaves_the_first() {
    let (state, _store) = test_helpers::test_app_state();
    let sender = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let mut join_a = Data::new();
    join_a.insert("room_id".into(), json!("a"));
    dispatch(&state, &mut room, sender, &tx, &request_text("room:join", join_a)).await;

    let mut join_b = Data::new();
    join_b.insert("room_id".into(), json!("b"));
    dispatch(&state, &mut room, sender, &tx, &request_text("room:join", join_b)).await;

    assert_eq!(room.as_deref(), Some("b"));
    let rooms = state.rooms.read().await;
    assert!(!rooms.contains_key("a"), "vacated room should be evicted");
    assert!(rooms.contains_key("b"));
}

#[tokio::test]
async fn unknown_draw_op_errors() {
    let (state, _store) = test_helpers::test_app_state();
    let sender = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    let mut room = None;

    let mut join_data = Data::new();
    join_data.insert("room_id".into(), json!("r1"));
    dispatch(&state, &mut room, sender, &tx, &request_text("room:join", join_data)).await;

    let replies = dispatch(&state, &mut room, sender, &tx, &request_text("draw:wipe", Data::new())).await;
    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(
        replies[0].data.get("message").and_then(|v| v.as_str()),
        Some("unknown draw op: wipe")
    );
}

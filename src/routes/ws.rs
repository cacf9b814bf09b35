//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Relay frames from room peers → forward to client
//!
//! Handler functions validate and call into the room service, which owns
//! mutation, fan-out, and persistence under the room's lock; the dispatch
//! layer only replies to the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → done/error reply to sender
//! 3. Close → leave the current room → cleanup

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::history::Action;
use crate::services;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Peer fan-out already happened
/// inside the room service; this only decides what the sender gets back.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving relay frames from room peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    // Which room this client has joined, if any.
    let mut current_room: Option<String> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut current_room, client_id, &client_tx, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Disconnect removes the participant from the broadcast group; its
    // already-applied operations stay applied.
    if let Some(room_id) = current_room {
        services::room::part(&state, &room_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender. Split from the socket loop so tests can exercise dispatch
/// end-to-end without a live websocket.
async fn process_inbound_text(
    state: &AppState,
    current_room: &mut Option<String>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    let prefix = req.prefix();

    // Appends arrive at pointer-move frequency; keep them out of the log.
    if req.syscall != "draw:append" {
        info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match prefix {
        "room" => handle_room(state, current_room, client_id, client_tx, &req).await,
        "draw" => handle_draw(state, current_room.as_deref(), client_id, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(
    state: &AppState,
    current_room: &mut Option<String>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "join" => {
            let Some(room_id) = req.room_id.clone().or_else(|| {
                req.data
                    .get("room_id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            }) else {
                return Err(req.error("room_id required"));
            };

            // Leave the current room if already joined.
            if let Some(old_room) = current_room.take() {
                services::room::part(state, &old_room, client_id).await;
            }

            match services::room::join(state, &room_id, client_id, client_tx.clone()).await {
                Ok(actions) => {
                    *current_room = Some(room_id);

                    let mut reply = Data::new();
                    reply.insert("actions".into(), serde_json::to_value(&actions).unwrap_or_default());
                    Ok(Outcome::Reply(reply))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        _ => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// DRAW HANDLERS
// =============================================================================

async fn handle_draw(
    state: &AppState,
    current_room: Option<&str>,
    client_id: Uuid,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(room_id) = current_room else {
        return Err(req.error("must join a room first"));
    };

    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "append" => {
            let Some(action) = req
                .data
                .get("action")
                .cloned()
                .and_then(|v| serde_json::from_value::<Action>(v).ok())
            else {
                return Err(req.error("action required"));
            };

            match services::room::apply_append(state, room_id, client_id, action).await {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "clear" => match services::room::apply_clear(state, room_id, client_id).await {
            Ok(()) => Ok(Outcome::Done),
            Err(e) => Err(req.error_from(&e)),
        },
        "undo" => match services::room::apply_undo(state, room_id, client_id).await {
            Ok(()) => Ok(Outcome::Done),
            Err(e) => Err(req.error_from(&e)),
        },
        "redo" => {
            // The restored stroke travels with the request when the client
            // has one; an absent or unreadable payload falls back to the
            // server's own undone stack.
            let shipped = req
                .data
                .get("stroke")
                .cloned()
                .and_then(|v| serde_json::from_value::<Vec<Action>>(v).ok());

            match services::room::apply_redo(state, room_id, client_id, shipped).await {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        _ => Err(req.error(format!("unknown draw op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.syscall != "draw:append" {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

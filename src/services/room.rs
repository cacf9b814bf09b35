//! Room session — authoritative log ownership, fan-out, and persistence.
//!
//! DESIGN
//! ======
//! One room = one authoritative `ActionLog`, hydrated from the store on
//! first join and owned by this module for its live lifetime. Every
//! operation locks the room's mutex for its full duration — in-memory
//! mutation, broadcast to peers, then the durable write — so events for one
//! room apply and broadcast in a single total order while other rooms run
//! concurrently.
//!
//! ERROR HANDLING
//! ==============
//! The durable write happens after peers have already been notified, so a
//! persistence failure is logged and swallowed rather than surfaced to the
//! propagation path. Join is the exception: a load failure fails the join,
//! since the joiner cannot be handed a snapshot.
//!
//! PROTOCOL ASYMMETRY
//! ==================
//! Undo broadcasts carry no payload: every replica pops its own tail stroke,
//! which is structurally equivalent. Redo broadcasts ship the restored
//! stroke explicitly, because a replica's undone stack may have diverged
//! across a reconnect and content is the only convergent currency.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::history::{Action, ActionLog};
use crate::services::store::StoreError;
use crate::state::{AppState, RoomState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not loaded: {0}")]
    NotLoaded(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::frame::ErrorCode for RoomError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotLoaded(_) => "E_ROOM_NOT_LOADED",
            Self::Store(_) => "E_STORE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a room, creating it on first contact. Hydrates the authoritative
/// log from the store when this is the first live participant, creating the
/// empty persisted record for a never-seen room. Returns the snapshot for
/// the joiner only.
///
/// # Errors
///
/// Returns a store error if hydration fails; the joiner gets no snapshot.
pub async fn join(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<Vec<Action>, RoomError> {
    let room = {
        let mut rooms = state.rooms.write().await;
        rooms.entry(room_id.to_string()).or_default().clone()
    };

    let mut room = room.lock().await;
    if room.clients.is_empty() {
        match hydrate(state, room_id).await {
            Ok(history) => room.history = history,
            Err(e) => {
                drop(room);
                evict_if_idle(state, room_id).await;
                return Err(e);
            }
        }
    }

    room.clients.insert(client_id, tx);
    info!(room_id, %client_id, clients = room.clients.len(), "client joined room");
    Ok(room.history.replay().cloned().collect())
}

/// Leave a room. Removes the participant from the broadcast group; the last
/// one out evicts the in-memory room (the persisted log survives).
pub async fn part(state: &AppState, room_id: &str, client_id: Uuid) {
    let Some(room) = live_room(state, room_id).await else {
        return;
    };

    {
        let mut room = room.lock().await;
        room.clients.remove(&client_id);
        info!(room_id, %client_id, remaining = room.clients.len(), "client left room");
        if !room.clients.is_empty() {
            return;
        }
    }
    evict_if_idle(state, room_id).await;
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Append one action to the authoritative log, relay it to every other
/// participant, then durably append it.
///
/// # Errors
///
/// Returns `NotLoaded` if the room has no live state.
pub async fn apply_append(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    action: Action,
) -> Result<(), RoomError> {
    let Some(room) = live_room(state, room_id).await else {
        return Err(RoomError::NotLoaded(room_id.to_string()));
    };
    let mut room = room.lock().await;

    room.history.append(action.clone());

    let frame = Frame::request("draw:append", Data::new())
        .with_data("action", serde_json::to_value(&action).unwrap_or_default());
    broadcast(&room, &frame, Some(client_id));

    if let Err(e) = state.store.append_one(room_id, &action).await {
        error!(error = %e, room_id, "append persist failed");
    }
    Ok(())
}

/// Empty the room's log and undone stack, relay a clear signal, persist the
/// empty sequence.
///
/// # Errors
///
/// Returns `NotLoaded` if the room has no live state.
pub async fn apply_clear(state: &AppState, room_id: &str, client_id: Uuid) -> Result<(), RoomError> {
    let Some(room) = live_room(state, room_id).await else {
        return Err(RoomError::NotLoaded(room_id.to_string()));
    };
    let mut room = room.lock().await;

    room.history.clear();
    broadcast(&room, &Frame::request("draw:clear", Data::new()), Some(client_id));

    if let Err(e) = state.store.set_all(room_id, &[]).await {
        error!(error = %e, room_id, "clear persist failed");
    }
    Ok(())
}

/// Pop the last stroke off the authoritative log. A no-op on an empty log:
/// nothing is broadcast or persisted. The undo signal carries no payload —
/// each peer pops its own tail stroke. The persisted log is overwritten
/// rather than popped by count, since one stroke can span many stored
/// elements.
///
/// # Errors
///
/// Returns `NotLoaded` if the room has no live state.
pub async fn apply_undo(state: &AppState, room_id: &str, client_id: Uuid) -> Result<(), RoomError> {
    let Some(room) = live_room(state, room_id).await else {
        return Err(RoomError::NotLoaded(room_id.to_string()));
    };
    let mut room = room.lock().await;

    if room.history.undo().is_none() {
        return Ok(());
    }
    broadcast(&room, &Frame::request("draw:undo", Data::new()), Some(client_id));

    if let Err(e) = state.store.set_all(room_id, room.history.actions()).await {
        error!(error = %e, room_id, "undo persist failed");
    }
    Ok(())
}

/// Restore the most recently undone stroke. Prefers the server's own undone
/// stack; falls back to the stroke shipped by the origin when the stack is
/// empty (the origin may have reconnected since its undo). Relays the
/// canonical restored stroke to every other participant.
///
/// # Errors
///
/// Returns `NotLoaded` if the room has no live state.
pub async fn apply_redo(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    shipped: Option<Vec<Action>>,
) -> Result<(), RoomError> {
    let Some(room) = live_room(state, room_id).await else {
        return Err(RoomError::NotLoaded(room_id.to_string()));
    };
    let mut room = room.lock().await;

    let stroke = match room.history.redo() {
        Some(stroke) => stroke,
        None => match shipped {
            Some(stroke) if !stroke.is_empty() => {
                room.history.restore(stroke.clone());
                stroke
            }
            _ => return Ok(()),
        },
    };

    let frame = Frame::request("draw:redo", Data::new())
        .with_data("stroke", serde_json::to_value(&stroke).unwrap_or_default());
    broadcast(&room, &frame, Some(client_id));

    if let Err(e) = state.store.set_all(room_id, room.history.actions()).await {
        error!(error = %e, room_id, "redo persist failed");
    }
    Ok(())
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Send a frame to every participant in a room, optionally excluding one.
/// Best-effort: a participant with a full channel is skipped.
pub fn broadcast(room: &RoomState, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        let _ = tx.try_send(frame.clone());
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn live_room(state: &AppState, room_id: &str) -> Option<Arc<Mutex<RoomState>>> {
    let rooms = state.rooms.read().await;
    rooms.get(room_id).cloned()
}

async fn hydrate(state: &AppState, room_id: &str) -> Result<ActionLog, RoomError> {
    match state.store.load(room_id).await? {
        Some(actions) => {
            info!(room_id, count = actions.len(), "hydrated room from store");
            Ok(ActionLog::from_actions(actions))
        }
        None => {
            state.store.create_empty(room_id).await?;
            info!(room_id, "created empty persisted room");
            Ok(ActionLog::new())
        }
    }
}

async fn evict_if_idle(state: &AppState, room_id: &str) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get(room_id).cloned() else {
        return;
    };
    if room.lock().await.clients.is_empty() {
        rooms.remove(room_id);
        info!(room_id, "evicted idle room from memory");
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;

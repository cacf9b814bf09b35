//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the persistence gateway handle (constructed once at startup) and
//! the map of live rooms. Each room is wrapped in its own async mutex: every
//! room-scoped operation — mutation, fan-out, persistence write — runs to
//! completion under that mutex, so one room's events are serialized while
//! different rooms proceed concurrently. The map lock is never held across
//! store I/O.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;
use crate::history::ActionLog;
use crate::services::store::RoomStore;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state: the authoritative action log and the broadcast
/// group. Hydrated from the store on first join, evicted when the last
/// participant leaves (the persisted log survives; the undone stack is
/// transient by definition).
pub struct RoomState {
    /// Authoritative action log for this room.
    pub history: ActionLog,
    /// Connected participants: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self { history: ActionLog::new(), clients: HashMap::new() }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    /// Persistence gateway, injected at startup.
    pub store: Arc<dyn RoomStore>,
    /// Live rooms keyed by their opaque id.
    pub rooms: Arc<RwLock<HashMap<String, Arc<Mutex<RoomState>>>>>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store, rooms: Arc::new(RwLock::new(HashMap::new())) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

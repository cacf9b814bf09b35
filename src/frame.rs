//! Protocol envelope for the replication stream.
//!
//! ARCHITECTURE
//! ============
//! Client and server exchange exactly one message shape: the `Frame`. A
//! client request names its operation in `syscall` ("room:join",
//! "draw:undo"), and the server answers with a done or error frame pointing
//! back at the request through `parent_id`. Mutations relayed to room peers
//! go out as fresh requests — the peers never asked, so there is nothing to
//! correlate.
//!
//! DESIGN
//! ======
//! - One flat `data` map carries every payload; nothing nests.
//! - `room_id` is an opaque string chosen by clients, absent on frames that
//!   are not room-scoped.
//! - Dispatch looks only at the syscall prefix; payload decoding belongs to
//!   the handlers.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// PAYLOAD KEYS
// =============================================================================

/// Human-readable description on error frames.
pub const KEY_MESSAGE: &str = "message";

/// Stable machine-readable code on error frames.
pub const KEY_CODE: &str = "code";

/// Whether the failed request is worth repeating.
pub const KEY_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload attached to every frame.
pub type Data = HashMap<String, serde_json::Value>;

/// Where a frame sits in its exchange: a request, or one of the two
/// terminal answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

/// One protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    /// Set on replies only: the id of the request being answered.
    pub parent_id: Option<Uuid>,
    /// Milliseconds since the Unix epoch, stamped at construction.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub syscall: String,
    pub status: Status,
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Implemented by service errors so they can travel as structured error
/// frames: a stable `E_*` code plus a hint whether retrying makes sense.
pub trait ErrorCode: std::fmt::Display {
    fn code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

impl Frame {
    /// Start a new exchange. Peer relays use this too: a relay is a request
    /// nobody answers.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: unix_millis(),
            room_id: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Answer this request with an empty done frame.
    #[must_use]
    pub fn done(&self) -> Self {
        self.answer(Status::Done, Data::new())
    }

    /// Answer this request with a done frame carrying `data`.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.answer(Status::Done, data)
    }

    /// Answer this request with a bare error message.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let data = Data::from([(KEY_MESSAGE.to_string(), message.into().into())]);
        self.answer(Status::Error, data)
    }

    /// Answer this request with a structured error: code, message, and the
    /// retryable hint all travel in `data`.
    #[must_use]
    pub fn error_from<E: ErrorCode + ?Sized>(&self, err: &E) -> Self {
        let data = Data::from([
            (KEY_CODE.to_string(), err.code().into()),
            (KEY_MESSAGE.to_string(), err.to_string().into()),
            (KEY_RETRYABLE.to_string(), err.retryable().into()),
        ]);
        self.answer(Status::Error, data)
    }

    /// Common reply plumbing: a fresh id, `parent_id` pointing here, and
    /// the request's room and syscall carried over.
    fn answer(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: unix_millis(),
            room_id: self.room_id.clone(),
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }

    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Routing prefix: the syscall up to the first ':', or the whole
    /// syscall when it has none.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;

//! Persistence gateway — durable room id → ordered action sequence.
//!
//! DESIGN
//! ======
//! The room session talks to storage through the `RoomStore` trait, injected
//! at startup as an `Arc<dyn RoomStore>`. Production uses `PgStore`: one row
//! per room with the full history as a JSONB array, so load and overwrite
//! are each a single round trip. Tests swap in an in-memory store.
//!
//! DURABILITY CONTRACT
//! ===================
//! After any write returns `Ok`, a subsequent `load` by any process observes
//! the update. Rooms are isolated from each other; nothing here orders
//! writes across rooms.

use sqlx::PgPool;

use crate::history::Action;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not persisted: {0}")]
    Missing(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable store mapping a room id to its ordered action sequence.
#[async_trait::async_trait]
pub trait RoomStore: Send + Sync {
    /// Load the persisted sequence, or `None` if the room was never created.
    async fn load(&self, room_id: &str) -> Result<Option<Vec<Action>>, StoreError>;

    /// Create an empty persisted record. Idempotent.
    async fn create_empty(&self, room_id: &str) -> Result<(), StoreError>;

    /// Durably append one action to the end of the sequence.
    async fn append_one(&self, room_id: &str, action: &Action) -> Result<(), StoreError>;

    /// Overwrite the whole sequence. Used by clear and by undo/redo, whose
    /// stroke-granularity edits can span multiple stored elements.
    async fn set_all(&self, room_id: &str, actions: &[Action]) -> Result<(), StoreError>;

    /// Truncate `count` elements off the tail of the sequence.
    async fn pop_last(&self, room_id: &str, count: usize) -> Result<(), StoreError>;
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

/// `RoomStore` over PostgreSQL. See `db/migrations` for the schema.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RoomStore for PgStore {
    async fn load(&self, room_id: &str) -> Result<Option<Vec<Action>>, StoreError> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT actions FROM rooms WHERE id = $1")
                .bind(room_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn create_empty(&self, room_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO rooms (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_one(&self, room_id: &str, action: &Action) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE rooms SET actions = actions || $2::jsonb, updated_at = now() WHERE id = $1",
        )
        .bind(room_id)
        .bind(serde_json::to_value(action)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(room_id.to_string()));
        }
        Ok(())
    }

    async fn set_all(&self, room_id: &str, actions: &[Action]) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE rooms SET actions = $2, updated_at = now() WHERE id = $1")
                .bind(room_id)
                .bind(serde_json::to_value(actions)?)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(room_id.to_string()));
        }
        Ok(())
    }

    async fn pop_last(&self, room_id: &str, count: usize) -> Result<(), StoreError> {
        if count == 0 {
            return Ok(());
        }
        let result = sqlx::query(
            "UPDATE rooms SET actions = (
                 SELECT COALESCE(jsonb_agg(elem ORDER BY idx), '[]'::jsonb)
                 FROM jsonb_array_elements(actions) WITH ORDINALITY AS t(elem, idx)
                 WHERE idx <= GREATEST(jsonb_array_length(actions) - $2, 0)
             ), updated_at = now()
             WHERE id = $1",
        )
        .bind(room_id)
        .bind(i64::try_from(count).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(room_id.to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// MEMORY STORE (tests)
// =============================================================================


#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

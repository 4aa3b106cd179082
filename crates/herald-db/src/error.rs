//! Storage error types.

use thiserror::Error;

/// Errors returned by the membership store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Our view of the room has drifted from the room server's. Nothing was written.
    #[error(
        "mismatched last sent event ID: had {database_id:?} in database got {room_server_id:?} from room server"
    )]
    LastSentIdMismatch {
        /// The event ID stored in our database.
        database_id: String,
        /// The event ID the room server expected us to have.
        room_server_id: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

//! Shared data models.

use serde::{Deserialize, Serialize};

/// A server that is joined to a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinedHost {
    /// ID of the `m.room.member` event that joined the server to the room.
    pub event_id: String,
    pub server_name: String,
}

impl JoinedHost {
    pub fn new(event_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self { event_id: event_id.into(), server_name: server_name.into() }
    }
}

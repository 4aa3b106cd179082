//! Federation-specific error types.

use herald_common::error::HeraldError;
use herald_db::StoreError;
use thiserror::Error;

/// Errors that can occur in federation operations.
#[derive(Debug, Error)]
pub enum FederationError {
    // ── Caller ───────────────────────────────────────────────────────────────

    #[error("sendevent: unexpected server to send as: got {got:?} expected {expected:?}")]
    IdentityMismatch { got: String, expected: String },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    // ── Key management ──────────────────────────────────────────────────────

    #[error("Failed to load signing key: {0}")]
    KeyLoad(String),

    // ── Remote communication ─────────────────────────────────────────────────

    #[error("HTTP error communicating with remote server '{0}': {1}")]
    RemoteHttp(String, String),

    #[error("Remote server '{server}' rejected the request with status {status}")]
    RemoteRejected { server: String, status: u16 },

    #[error("Request to remote server '{0}' timed out")]
    Timeout(String),

    // ── Storage ─────────────────────────────────────────────────────────────

    #[error(transparent)]
    Store(#[from] StoreError),

    // ── General ─────────────────────────────────────────────────────────────

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<FederationError> for HeraldError {
    fn from(e: FederationError) -> Self {
        match e {
            FederationError::IdentityMismatch { got, expected } => {
                HeraldError::IdentityMismatch { got, expected }
            }
            FederationError::MalformedEvent(message) => HeraldError::Validation { message },
            FederationError::Store(StoreError::LastSentIdMismatch { database_id, room_server_id }) => {
                HeraldError::LastSentIdMismatch { database_id, room_server_id }
            }
            FederationError::Store(StoreError::Database(e)) => HeraldError::Database(e),
            other => HeraldError::Internal(anyhow::Error::new(other)),
        }
    }
}

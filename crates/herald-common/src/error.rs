//! Centralized error type for the Herald internal API.
//!
//! Uses `thiserror` for the definitions and maps every variant onto an HTTP
//! status and a stable error code, so handlers can return it directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error returned to callers of the internal API (the room server).
#[derive(Debug, thiserror::Error)]
pub enum HeraldError {
    // === Caller errors ===
    #[error("unexpected server to send as: got {got:?} expected {expected:?}")]
    IdentityMismatch { got: String, expected: String },

    #[error(
        "mismatched last sent event ID: had {database_id:?} in database got {room_server_id:?} from room server"
    )]
    LastSentIdMismatch {
        database_id: String,
        room_server_id: String,
    },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // === Infrastructure errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_server_id: Option<String>,
}

impl HeraldError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IdentityMismatch { .. } => StatusCode::FORBIDDEN,
            Self::LastSentIdMismatch { .. } => StatusCode::CONFLICT,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code string for programmatic handling by the caller.
    pub fn error_code(&self) -> &str {
        match self {
            Self::IdentityMismatch { .. } => "IDENTITY_MISMATCH",
            Self::LastSentIdMismatch { .. } => "LAST_SENT_ID_MISMATCH",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for HeraldError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to callers
        let message = match &self {
            HeraldError::Database(e) => {
                tracing::error!("Database error: {e}");
                "An internal error occurred".to_string()
            }
            HeraldError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let (database_id, room_server_id) = match &self {
            HeraldError::LastSentIdMismatch { database_id, room_server_id } => {
                (Some(database_id.clone()), Some(room_server_id.clone()))
            }
            _ => (None, None),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
            database_id,
            room_server_id,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using HeraldError.
pub type HeraldResult<T> = Result<T, HeraldError>;

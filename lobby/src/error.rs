//! Lobby error type: an internal detail trail plus the HTTP status and
//! message the client is allowed to see.

use thiserror::Error;

/// Status 200 with a message is a *semantic* miss ("no joinable room
/// found", "room full"), not a failure; everything else is an error class.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct LobbyError {
    status: u16,
    message: String,
    detail: String,
}

impl LobbyError {
    pub fn with_status(
        status: u16,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> LobbyError {
        LobbyError {
            status,
            message: message.into(),
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> LobbyError {
        Self::with_status(400, "Invalid argument", detail)
    }

    pub fn internal(detail: impl Into<String>) -> LobbyError {
        Self::with_status(500, "Internal server error", detail)
    }

    pub fn unavailable(message: impl Into<String>, detail: impl Into<String>) -> LobbyError {
        Self::with_status(503, message, detail)
    }

    /// HTTP status surfaced to the client.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Client-visible message. Never carries internal details.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the internal detail trail, keeping status and message.
    pub fn trace(mut self, at: &str) -> LobbyError {
        self.detail = format!("{at}: {}", self.detail);
        self
    }
}

impl From<sqlx::Error> for LobbyError {
    fn from(err: sqlx::Error) -> LobbyError {
        LobbyError::internal(format!("db error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_keeps_status_and_message() {
        let err = LobbyError::with_status(200, "Room full", "join: full").trace("JoinById");
        assert_eq!(err.status(), 200);
        assert_eq!(err.message(), "Room full");
        assert_eq!(err.to_string(), "JoinById: join: full");
    }

    #[test]
    fn test_db_errors_map_to_internal() {
        let err: LobbyError = sqlx::Error::PoolClosed.into();
        assert_eq!(err.status(), 500);
        assert_eq!(err.message(), "Internal server error");
    }
}

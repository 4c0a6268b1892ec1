//! Host-side operation errors, carrying the RPC status code the lobby
//! maps from.

use thiserror::Error;

use roomnet_common::rpc::RpcCode;

#[derive(Debug, Error)]
#[error("{detail}")]
pub struct GameError {
    code: RpcCode,
    detail: String,
}

impl GameError {
    pub fn new(code: RpcCode, detail: impl Into<String>) -> GameError {
        GameError {
            code,
            detail: detail.into(),
        }
    }

    pub fn invalid_argument(detail: impl Into<String>) -> GameError {
        Self::new(RpcCode::InvalidArgument, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> GameError {
        Self::new(RpcCode::NotFound, detail)
    }

    pub fn internal(detail: impl Into<String>) -> GameError {
        Self::new(RpcCode::Internal, detail)
    }

    pub fn code(&self) -> RpcCode {
        self.code
    }

    /// Client-visible message for the RPC error body.
    pub fn public_message(&self) -> &'static str {
        match self.code {
            RpcCode::InvalidArgument => "invalid argument",
            RpcCode::NotFound => "room not found",
            RpcCode::FailedPrecondition => "room not available",
            RpcCode::ResourceExhausted => "room full",
            RpcCode::AlreadyExists => "already in room",
            RpcCode::Internal => "internal error",
        }
    }
}

impl From<sqlx::Error> for GameError {
    fn from(err: sqlx::Error) -> GameError {
        GameError::internal(format!("db error: {err}"))
    }
}

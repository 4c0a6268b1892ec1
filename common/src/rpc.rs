//! Internal RPC between the lobby and the game/hub hosts.
//!
//! Hosts expose `POST /rpc/{create,join,watch}` as JSON; failures carry a
//! typed status code so the lobby can map them without parsing messages.
//! The pool keeps one client per host address and rebuilds it after a
//! transport-level failure.

use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ClientInfo, JoinedRoomRes, RoomOption};

/// Per-call deadline; a hung host must not stall the caller's retry loop.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Status vocabulary of the host RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcCode {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    AlreadyExists,
    Internal,
}

impl RpcCode {
    /// HTTP status the host answers with for this code.
    pub fn http_status(self) -> u16 {
        match self {
            RpcCode::InvalidArgument => 400,
            RpcCode::NotFound => 404,
            RpcCode::FailedPrecondition => 412,
            RpcCode::ResourceExhausted => 429,
            RpcCode::AlreadyExists => 409,
            RpcCode::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: RpcCode,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc failed: {code:?}: {message}")]
    Status { code: RpcCode, message: String },
    #[error("rpc transport error: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn code(&self) -> Option<RpcCode> {
        match self {
            RpcError::Status { code, .. } => Some(*code),
            RpcError::Transport(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomReq {
    pub app_id: String,
    pub room_option: RoomOption,
    pub master_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomReq {
    pub app_id: String,
    pub room_id: String,
    pub client_info: ClientInfo,
}

/// Client for one host address.
#[derive(Clone)]
pub struct RpcClient {
    base: String,
    http: reqwest::Client,
}

impl RpcClient {
    fn new(addr: &str) -> RpcClient {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("http client");
        RpcClient {
            base: format!("http://{addr}"),
            http,
        }
    }

    pub async fn create(&self, req: &CreateRoomReq) -> Result<JoinedRoomRes, RpcError> {
        self.call("create", req).await
    }

    pub async fn join(&self, req: &JoinRoomReq) -> Result<JoinedRoomRes, RpcError> {
        self.call("join", req).await
    }

    pub async fn watch(&self, req: &JoinRoomReq) -> Result<JoinedRoomRes, RpcError> {
        self.call("watch", req).await
    }

    async fn call<Req: Serialize, Res: DeserializeOwned>(
        &self,
        method: &str,
        req: &Req,
    ) -> Result<Res, RpcError> {
        let url = format!("{}/rpc/{}", self.base, method);
        let resp = self
            .http
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if resp.status().is_success() {
            return resp
                .json::<Res>()
                .await
                .map_err(|e| RpcError::Transport(e.to_string()));
        }

        match resp.json::<RpcErrorBody>().await {
            Ok(body) => Err(RpcError::Status {
                code: body.code,
                message: body.message,
            }),
            Err(e) => Err(RpcError::Transport(e.to_string())),
        }
    }
}

/// Lazy per-address client pool.
pub struct RpcPool {
    clients: DashMap<String, RpcClient>,
}

impl RpcPool {
    pub fn new() -> RpcPool {
        RpcPool {
            clients: DashMap::new(),
        }
    }

    /// Reuse the client for `addr`, building one on first use.
    pub fn get(&self, addr: &str) -> RpcClient {
        self.clients
            .entry(addr.to_string())
            .or_insert_with(|| RpcClient::new(addr))
            .clone()
    }

    /// Drop the client for `addr`; the next `get` rebuilds it.
    pub fn invalidate(&self, addr: &str) {
        self.clients.remove(addr);
    }
}

impl Default for RpcPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuses_clients() {
        let pool = RpcPool::new();
        let a = pool.get("host1:8280");
        let b = pool.get("host1:8280");
        assert_eq!(a.base, b.base);
        assert_eq!(pool.clients.len(), 1);

        pool.get("host2:8280");
        assert_eq!(pool.clients.len(), 2);

        pool.invalidate("host1:8280");
        assert_eq!(pool.clients.len(), 1);
    }

    #[test]
    fn test_rpc_code_http_mapping() {
        assert_eq!(RpcCode::InvalidArgument.http_status(), 400);
        assert_eq!(RpcCode::AlreadyExists.http_status(), 409);
        assert_eq!(RpcCode::ResourceExhausted.http_status(), 429);
    }

    #[test]
    fn test_error_body_roundtrip() {
        let body = RpcErrorBody {
            code: RpcCode::FailedPrecondition,
            message: "room not joinable".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        let back: RpcErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, RpcCode::FailedPrecondition);
    }
}

//! Shared plumbing for the roomnet services.
//!
//! Everything both the lobby and the game/hub hosts need lives here:
//! configuration loading, database access and row models, per-room auth
//! tokens, heartbeat-filtered host caches, and the internal RPC client
//! pool the lobby uses to dispatch onto hosts.

pub mod auth;
pub mod config;
pub mod db;
pub mod hosts;
pub mod model;
pub mod rpc;
pub mod time;

pub use auth::AuthToken;
pub use config::{ConfigError, GameConfig, LobbyConfig};
pub use hosts::{HostCache, HostError, HostTable};
pub use model::{
    AppId, AppRow, ClientId, ClientInfo, HostRow, JoinedRoomRes, RoomId, RoomInfo, RoomOption,
    HOST_STATUS_RUNNING,
};
pub use rpc::{CreateRoomReq, JoinRoomReq, RpcClient, RpcCode, RpcError, RpcErrorBody, RpcPool};

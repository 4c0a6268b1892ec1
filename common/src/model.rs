//! Row models and wire DTOs shared by the lobby and the hosts.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::auth::AuthToken;

pub type AppId = String;
pub type RoomId = String;
pub type ClientId = String;

/// Host row `status` value for a serving host.
pub const HOST_STATUS_RUNNING: i64 = 1;

/// One tenant application. Loaded once at boot; `key` is the HMAC secret
/// room keys derive from.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AppRow {
    pub id: String,
    pub key: String,
}

/// A room, both as persisted in the `room` table and as echoed in wire
/// responses.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RoomInfo {
    /// 16 lowercase-hex chars, globally unique per app.
    pub id: String,
    pub app_id: String,
    pub host_id: u32,
    /// Optional human-friendly number, unique per app while the room lives.
    pub number: Option<i64>,
    pub search_group: u32,
    pub max_players: u32,
    pub players: u32,
    pub visible: bool,
    pub joinable: bool,
    pub watchable: bool,
    /// Marshaled dict, searchable through the lobby.
    pub public_props: Vec<u8>,
    /// Marshaled dict, delivered only to room members.
    pub private_props: Vec<u8>,
    /// Unix seconds.
    pub created: i64,
}

/// A game or hub host row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HostRow {
    pub id: u32,
    pub hostname: String,
    pub public_name: String,
    pub grpc_port: u16,
    pub ws_port: u16,
    pub status: i64,
    pub heartbeat: i64,
}

impl HostRow {
    /// Address of the host's internal RPC endpoint.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.grpc_port)
    }
}

/// Client identity as presented on create/join/watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    /// Marshaled dict of the client's public props.
    #[serde(default)]
    pub props: Vec<u8>,
}

/// Room creation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOption {
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub joinable: bool,
    #[serde(default = "default_true")]
    pub watchable: bool,
    /// Assign a random room number in `1..=max_room_num`.
    #[serde(default)]
    pub with_number: bool,
    #[serde(default)]
    pub search_group: u32,
    pub max_players: u32,
    /// Client silence limit in seconds; 0 picks the host default.
    #[serde(default)]
    pub client_deadline: u32,
    #[serde(default)]
    pub public_props: Vec<u8>,
    #[serde(default)]
    pub private_props: Vec<u8>,
}

fn default_true() -> bool {
    true
}

/// Successful create/join/watch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedRoomRes {
    pub room_info: RoomInfo,
    pub players: Vec<ClientInfo>,
    pub token: AuthToken,
    pub master_id: ClientId,
    /// Client silence limit in seconds.
    pub deadline: u32,
}

//! Service configuration, loaded from TOML files.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Read and deserialize a TOML config file.
pub fn load<T: DeserializeOwned>(path: &str) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

/// Lobby process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub db_url: String,
    pub bind_addr: String,
    /// A host is live while its heartbeat is at most this old.
    pub valid_heartbeat_secs: u64,
    /// Candidate cap for join-at-random and the search default limit.
    pub search_limit: u32,
    /// Per-request deadline for lobby operations.
    pub fetch_timeout_ms: u64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite::memory:".into(),
            bind_addr: "0.0.0.0:8180".into(),
            valid_heartbeat_secs: 5,
            search_limit: 1000,
            fetch_timeout_ms: 10_000,
        }
    }
}

/// Game / hub host process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub db_url: String,
    pub bind_addr: String,
    pub host_id: u32,
    pub hostname: String,
    pub public_name: String,
    pub grpc_port: u16,
    pub ws_port: u16,
    /// Room numbers are drawn from `1..=max_room_num`.
    pub max_room_num: u32,
    /// Attempts at a unique room id/number before giving up.
    pub retry_count: u32,
    /// Default client silence limit when the room option leaves it zero.
    pub default_deadline_secs: u32,
    /// Regular events retained per room for replay.
    pub history_limit: usize,
    /// Capacity of the room msg queue and of each client send queue.
    pub queue_len: usize,
    /// Serve watchers (hub host) instead of players (game host).
    pub hub_mode: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite::memory:".into(),
            bind_addr: "0.0.0.0:8280".into(),
            host_id: 1,
            hostname: "localhost".into(),
            public_name: "localhost".into(),
            grpc_port: 8280,
            ws_port: 8280,
            max_room_num: 999_999,
            retry_count: 5,
            default_deadline_secs: 30,
            history_limit: 128,
            queue_len: 32,
            hub_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_config_defaults_fill_missing_fields() {
        let conf: GameConfig = toml::from_str("host_id = 7\nhub_mode = true").unwrap();
        assert_eq!(conf.host_id, 7);
        assert!(conf.hub_mode);
        assert_eq!(conf.retry_count, 5);
        assert_eq!(conf.max_room_num, 999_999);
    }

    #[test]
    fn test_lobby_config_defaults() {
        let conf = LobbyConfig::default();
        assert_eq!(conf.valid_heartbeat_secs, 5);
        assert_eq!(conf.search_limit, 1000);
    }
}

//! Payload types returned by the game server's REST control API and the
//! remote filesystem.
//!
//! Field names follow the wire format of the `/v1/api/*` endpoints; unknown
//! fields are ignored and missing ones fall back to defaults so that older
//! server builds still decode.

use serde::{Deserialize, Serialize};

/// Response of `GET /v1/api/info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerInfo {
    pub version: String,
    #[serde(rename = "servername")]
    pub server_name: String,
    pub description: String,
    #[serde(rename = "worldguid")]
    pub world_guid: String,
}

/// Response of `GET /v1/api/metrics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerMetrics {
    #[serde(rename = "currentplayernum")]
    pub current_players: u32,
    #[serde(rename = "maxplayernum")]
    pub max_players: u32,
    /// Seconds since the server process started.
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
    #[serde(rename = "serverfps")]
    pub fps: f64,
    #[serde(rename = "serverframetime")]
    pub frame_time_ms: f64,
    /// In-game days elapsed.
    #[serde(rename = "days")]
    pub days_elapsed: u32,
}

/// One connected player.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Player {
    pub name: String,
    #[serde(rename = "accountName")]
    pub account_name: String,
    #[serde(rename = "playerId")]
    pub player_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub ip: String,
    pub ping: f64,
    pub level: u32,
}

/// Response of `GET /v1/api/players`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerList {
    pub players: Vec<Player>,
}

/// The info/metrics/players bundle fetched together and cached per endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerSnapshot {
    pub info: ServerInfo,
    pub metrics: ServerMetrics,
    pub players: PlayerList,
}

/// A directory entry on the remote filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, mtime: u64) -> Self {
        Self {
            name: name.into(),
            mtime,
            is_dir: false,
        }
    }
}

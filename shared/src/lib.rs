use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_MOVE_SPEED: f64 = 5.0;
pub const DEFAULT_MAX_PLAYERS: usize = 100;
pub const DEFAULT_MIN_X: f64 = -50.0;
pub const DEFAULT_MAX_X: f64 = 50.0;
pub const DEFAULT_MIN_Y: f64 = -50.0;
pub const DEFAULT_MAX_Y: f64 = 50.0;
pub const DEFAULT_PLAYER_HEALTH: i32 = 100;

/// Largest inbound frame the server accepts, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

pub const ERROR_SERVER_FULL: u16 = 503;

/// Messages a client may send. Anything with an unrecognised `type` decodes
/// to [`ClientMessage::Unknown`] so newer clients do not break older servers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    PlayerInput(PlayerInputMessage),
    #[serde(alias = "projectile")]
    Shoot(ShootMessage),
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInputMessage {
    /// Informational only; the server routes input by connection.
    #[serde(default)]
    pub player_id: String,
    pub move_x: f64,
    pub move_y: f64,
    #[serde(default)]
    pub facing_left: bool,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub sequence_id: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShootMessage {
    /// Ignored by the server; the owner is always the sending connection.
    #[serde(default)]
    pub player_id: String,
    pub projectile_id: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
    pub speed: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    PlayerId {
        player_id: String,
    },
    GameState {
        players: HashMap<String, PlayerView>,
        projectiles: HashMap<String, ProjectileView>,
        timestamp: f64,
    },
    PlayerJoined {
        player_id: String,
        pos_x: f64,
        pos_y: f64,
    },
    PlayerLeft {
        player_id: String,
    },
    Error {
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Player fields visible to every client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub move_x: f64,
    pub move_y: f64,
    pub facing_left: bool,
    pub move_speed: f64,
    pub health: i32,
    pub max_health: i32,
    pub is_alive: bool,
    pub last_update: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileView {
    pub id: String,
    pub owner_id: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
    pub speed: f64,
    pub created_at: f64,
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn timestamp_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}

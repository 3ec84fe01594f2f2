//! Read-only game configuration handed to the hub at startup.

use crate::error::ConfigError;
use shared::{
    DEFAULT_MAX_PLAYERS, DEFAULT_MAX_X, DEFAULT_MAX_Y, DEFAULT_MIN_X, DEFAULT_MIN_Y,
    DEFAULT_MOVE_SPEED, DEFAULT_PLAYER_HEALTH, DEFAULT_TICK_RATE, MAX_MESSAGE_SIZE,
};
use std::time::Duration;

pub const REGISTER_QUEUE_CAPACITY: usize = 100;
pub const UNREGISTER_QUEUE_CAPACITY: usize = 100;
pub const INPUT_QUEUE_CAPACITY: usize = 1000;
pub const PROJECTILE_QUEUE_CAPACITY: usize = 500;
pub const BROADCAST_QUEUE_CAPACITY: usize = 1000;
pub const CONTROL_QUEUE_CAPACITY: usize = 500;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Time allowed to write a single frame to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between two inbound frames (pongs included).
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Keepalive period; must be shorter than `PONG_WAIT`.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Sessions with no inbound frame at all for this long are evicted. Must
/// exceed `PING_PERIOD`, since a quiet client only answers pings.
pub const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const PROJECTILE_LIFETIME: Duration = Duration::from_secs(5);
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Axis-aligned rectangle every player position is kept inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl WorldBounds {
    /// Clamps each axis independently into the rectangle.
    pub fn clamp_position(&self, x: f64, y: f64) -> (f64, f64) {
        (x.clamp(self.min_x, self.max_x), y.clamp(self.min_y, self.max_y))
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_x: DEFAULT_MIN_X,
            max_x: DEFAULT_MAX_X,
            min_y: DEFAULT_MIN_Y,
            max_y: DEFAULT_MAX_Y,
        }
    }
}

/// Connection timings used by the WebSocket transport.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub tick_rate: u32,
    pub tick_interval: Duration,
    /// World units per second at full input deflection.
    pub move_speed: f64,
    pub world_bounds: WorldBounds,
    pub max_players: usize,
    pub player_health: i32,
    pub outbound_capacity: usize,
    /// Sessions with no inbound frame for this long are evicted.
    pub idle_timeout: Option<Duration>,
    /// Projectiles older than this are removed on the next tick.
    pub projectile_lifetime: Option<Duration>,
    pub stats_interval: Duration,
    pub connection: ConnectionConfig,
}

impl GameConfig {
    /// Builds a config for the given tick rate, deriving the tick interval.
    pub fn with_tick_rate(tick_rate: u32) -> Result<Self, ConfigError> {
        if tick_rate == 0 {
            return Err(ConfigError::InvalidTickRate(tick_rate));
        }
        Ok(Self {
            tick_rate,
            tick_interval: Duration::from_secs(1) / tick_rate,
            ..Self::default()
        })
    }

    pub fn tick_seconds(&self) -> f64 {
        self.tick_interval.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidTickRate(self.tick_rate));
        }
        if !self.move_speed.is_finite() || self.move_speed <= 0.0 {
            return Err(ConfigError::InvalidMoveSpeed(self.move_speed));
        }
        let b = &self.world_bounds;
        let finite = [b.min_x, b.max_x, b.min_y, b.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || b.min_x > b.max_x || b.min_y > b.max_y {
            return Err(ConfigError::InvalidBounds(*b));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.connection.ping_period >= self.connection.pong_wait {
            return Err(ConfigError::InvalidKeepalive {
                ping_period: self.connection.ping_period,
                pong_wait: self.connection.pong_wait,
            });
        }
        if let Some(idle) = self.idle_timeout {
            if idle <= self.connection.ping_period {
                return Err(ConfigError::InvalidIdleTimeout {
                    idle_timeout: idle,
                    ping_period: self.connection.ping_period,
                });
            }
        }
        Ok(())
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            tick_interval: Duration::from_secs(1) / DEFAULT_TICK_RATE,
            move_speed: DEFAULT_MOVE_SPEED,
            world_bounds: WorldBounds::default(),
            max_players: DEFAULT_MAX_PLAYERS,
            player_health: DEFAULT_PLAYER_HEALTH,
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            idle_timeout: Some(CLIENT_IDLE_TIMEOUT),
            projectile_lifetime: Some(PROJECTILE_LIFETIME),
            stats_interval: STATS_INTERVAL,
            connection: ConnectionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.max_players, 100);
        assert_approx_eq!(config.tick_seconds(), 1.0 / 30.0, 1e-6);
    }

    #[test]
    fn test_with_tick_rate() {
        let config = GameConfig::with_tick_rate(20).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert!(matches!(
            GameConfig::with_tick_rate(0),
            Err(ConfigError::InvalidTickRate(0))
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = GameConfig::default();
        config.world_bounds.min_x = 10.0;
        config.world_bounds.max_x = -10.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBounds(_))));
    }

    #[test]
    fn test_invalid_speed_and_keepalive_rejected() {
        let mut config = GameConfig::default();
        config.move_speed = 0.0;
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.connection.ping_period = config.connection.pong_wait;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidKeepalive { .. })
        ));
    }

    #[test]
    fn test_idle_timeout_must_outlast_ping_period() {
        let mut config = GameConfig::default();
        config.idle_timeout = Some(config.connection.ping_period);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIdleTimeout { .. })
        ));

        config.idle_timeout = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clamp_position() {
        let bounds = WorldBounds::default();
        assert_eq!(bounds.clamp_position(-60.0, 60.0), (-50.0, 50.0));
        assert_eq!(bounds.clamp_position(12.0, -3.0), (12.0, -3.0));
        assert_eq!(bounds.clamp_position(50.0, -50.0), (50.0, -50.0));
        assert!(bounds.contains(50.0, -50.0));
        assert!(!bounds.contains(50.1, 0.0));
    }
}

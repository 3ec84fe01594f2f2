use crate::config::WorldBounds;
use std::time::Duration;
use thiserror::Error;

/// Why the hub refused to accept an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The named intake queue is saturated and the event was dropped.
    #[error("{0} queue is full, event dropped")]
    IntakeFull(&'static str),

    /// The hub loop has stopped.
    #[error("hub is not running")]
    HubClosed,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tick rate must be positive, got {0}")]
    InvalidTickRate(u32),

    #[error("move speed must be a positive finite number, got {0}")]
    InvalidMoveSpeed(f64),

    #[error("world bounds are inverted or not finite: {0:?}")]
    InvalidBounds(WorldBounds),

    #[error("outbound queue capacity must be positive")]
    InvalidQueueCapacity,

    #[error("ping period {ping_period:?} must be shorter than pong wait {pong_wait:?}")]
    InvalidKeepalive {
        ping_period: Duration,
        pong_wait: Duration,
    },

    #[error("idle timeout {idle_timeout:?} must be longer than ping period {ping_period:?}")]
    InvalidIdleTimeout {
        idle_timeout: Duration,
        ping_period: Duration,
    },
}

/// Inbound frames that never make it into the hub.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Hub(#[from] HubError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

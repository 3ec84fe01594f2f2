//! # Arena Server Library
//!
//! Coordination core for a real-time multiplayer arena. Clients connect over
//! WebSocket, send movement intent and projectile spawns, and receive a full
//! copy of the world at a fixed tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Single-Writer World
//! Exactly one task, the [`hub::Hub`], mutates the world and the set of
//! connected sessions. Every other task talks to it through bounded queues,
//! so concurrent clients never race on shared state and the result of any
//! interleaving is the same as applying the hub's own processing order.
//!
//! ### Session Lifecycle
//! A connection moves through `Connected → Registered → Bound → Unregistering
//! → Closed`. Registering binds a fresh player at the origin when there is
//! room; otherwise the session stays an unbound spectator. Unregistering is
//! idempotent and is the only path by which a player leaves the world.
//!
//! ### Tick Broadcast
//! On each tick the hub takes a deep-copied snapshot, serializes it once and
//! enqueues it on every session without blocking. A session whose outbound
//! queue is full is evicted instead of slowing the broadcast down.
//!
//! ## Backpressure
//!
//! There are two distinct policies:
//! - **Intake**: a full hub queue drops the *event*, logs a warning and
//!   returns [`error::HubError::IntakeFull`]. The connection stays up.
//! - **Outbound**: a full session queue drops the *session*. Its player is
//!   removed and the remaining sessions receive `playerLeft`.
//!
//! ## Module Organization
//!
//! ### World Module (`world`)
//! Player and projectile state, movement clamped to the world bounds, and
//! read-only snapshots.
//!
//! ### Session Module (`session`)
//! Per-connection handle owned by the hub, and the registry that fans
//! serialized messages out.
//!
//! ### Hub Module (`hub`)
//! The event loop, intake queues and the cloneable [`hub::HubHandle`].
//!
//! ### Network Module (`network`)
//! WebSocket accept loop with read and write pumps, keepalive pings and
//! write deadlines.
//!
//! ### Stats Module (`stats`)
//! Counters bumped by the hub and a periodic collector.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GameConfig;
//! use server::hub::Hub;
//! use server::network::NetworkServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GameConfig::with_tick_rate(30)?;
//!     let (hub, handle) = Hub::new(config.clone())?;
//!     let server = NetworkServer::bind("127.0.0.1:8080", handle, &config).await?;
//!
//!     tokio::spawn(hub.run());
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod network;
pub mod session;
pub mod stats;
pub mod world;

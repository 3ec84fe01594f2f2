//! The hub: single writer of the world and owner of every session
//!
//! All mutation of [`WorldState`] and of the session set happens inside
//! [`Hub::run`], one event at a time. Connection tasks never touch either
//! directly; they hold a cloneable [`HubHandle`] and submit events onto
//! bounded intake queues. Submission never blocks: a saturated queue drops the
//! event, logs it and reports [`HubError::IntakeFull`] to the caller.
//!
//! On every tick the hub drains whatever is pending, takes a deep-copied
//! snapshot of the world, serializes it once and enqueues the same bytes on
//! every session. A session whose outbound queue is full at that moment is
//! evicted rather than waited on, so one slow reader can never stall the
//! broadcast for everyone else.

use crate::config::{
    GameConfig, BROADCAST_QUEUE_CAPACITY, CONTROL_QUEUE_CAPACITY, INPUT_QUEUE_CAPACITY,
    PROJECTILE_QUEUE_CAPACITY, REGISTER_QUEUE_CAPACITY, UNREGISTER_QUEUE_CAPACITY,
};
use crate::error::{ConfigError, HubError};
use crate::session::{
    DeliveryError, DisconnectReason, Outbound, Session, SessionId, SessionRegistry, SessionState,
};
use crate::stats::HubCounters;
use crate::world::{MoveInput, MoveOutcome, PlayerId, ProjectileSpec, SpawnOutcome, WorldSnapshot, WorldState};
use log::{debug, error, info, warn};
use shared::{ServerMessage, ERROR_SERVER_FULL};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct InputEvent {
    pub player_id: PlayerId,
    pub input: MoveInput,
}

#[derive(Debug, Clone)]
pub struct ProjectileEvent {
    /// Session the request arrived on; the projectile's owner is that
    /// session's bound player, never anything the client claims.
    pub session_id: SessionId,
    pub spec: ProjectileSpec,
}

/// Administrative requests handled in the hub loop.
#[derive(Debug, Clone)]
pub enum Control {
    Kick(SessionId),
    /// Refreshes a session's liveness for frames that carry no gameplay event.
    Touch(SessionId),
    SendTo { session_id: SessionId, payload: Outbound },
    Shutdown,
}

struct Intake {
    register: mpsc::Receiver<Session>,
    unregister: mpsc::Receiver<SessionId>,
    input: mpsc::Receiver<InputEvent>,
    projectile: mpsc::Receiver<ProjectileEvent>,
    broadcast: mpsc::Receiver<Outbound>,
    control: mpsc::Receiver<Control>,
}

/// Cheap, cloneable submission side of the hub.
#[derive(Clone)]
pub struct HubHandle {
    register: mpsc::Sender<Session>,
    unregister: mpsc::Sender<SessionId>,
    input: mpsc::Sender<InputEvent>,
    projectile: mpsc::Sender<ProjectileEvent>,
    broadcast: mpsc::Sender<Outbound>,
    control: mpsc::Sender<Control>,
    world: Arc<RwLock<WorldState>>,
    counters: Arc<HubCounters>,
}

impl HubHandle {
    pub fn register(&self, session: Session) -> Result<(), HubError> {
        self.offer(&self.register, session, "register")
    }

    /// Asks the hub to remove a session. Safe to call any number of times.
    pub fn unregister(&self, session_id: &str) -> Result<(), HubError> {
        self.offer(&self.unregister, session_id.to_string(), "unregister")
    }

    pub fn submit_input(&self, player_id: &str, input: MoveInput) -> Result<(), HubError> {
        let event = InputEvent {
            player_id: player_id.to_string(),
            input,
        };
        self.offer(&self.input, event, "input")
    }

    pub fn submit_projectile(&self, session_id: &str, spec: ProjectileSpec) -> Result<(), HubError> {
        let event = ProjectileEvent {
            session_id: session_id.to_string(),
            spec,
        };
        self.offer(&self.projectile, event, "projectile")
    }

    /// Queues an already-serialized message for every session.
    pub fn broadcast(&self, payload: Outbound) -> Result<(), HubError> {
        self.offer(&self.broadcast, payload, "broadcast")
    }

    pub fn kick(&self, session_id: &str) -> Result<(), HubError> {
        self.offer(&self.control, Control::Kick(session_id.to_string()), "control")
    }

    pub fn touch(&self, session_id: &str) -> Result<(), HubError> {
        self.offer(&self.control, Control::Touch(session_id.to_string()), "control")
    }

    pub fn send_to(&self, session_id: &str, payload: Outbound) -> Result<(), HubError> {
        let control = Control::SendTo {
            session_id: session_id.to_string(),
            payload,
        };
        self.offer(&self.control, control, "control")
    }

    pub fn shutdown(&self) -> Result<(), HubError> {
        self.offer(&self.control, Control::Shutdown, "control")
    }

    /// Read-only copy of the current world, taken under the read lock.
    pub async fn snapshot(&self) -> WorldSnapshot {
        self.world.read().await.snapshot()
    }

    pub fn counters(&self) -> Arc<HubCounters> {
        Arc::clone(&self.counters)
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    fn offer<T>(&self, tx: &mpsc::Sender<T>, event: T, queue: &'static str) -> Result<(), HubError> {
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Hub {} queue full, dropping event", queue);
                self.counters.record_dropped();
                Err(HubError::IntakeFull(queue))
            }
            Err(TrySendError::Closed(_)) => Err(HubError::HubClosed),
        }
    }
}

pub struct Hub {
    config: Arc<GameConfig>,
    world: Arc<RwLock<WorldState>>,
    sessions: SessionRegistry,
    intake: Intake,
    counters: Arc<HubCounters>,
    tick_count: u64,
    running: bool,
}

impl Hub {
    pub fn new(config: GameConfig) -> Result<(Hub, HubHandle), ConfigError> {
        config.validate()?;

        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(UNREGISTER_QUEUE_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (projectile_tx, projectile_rx) = mpsc::channel(PROJECTILE_QUEUE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);

        let world = Arc::new(RwLock::new(WorldState::new(&config)));
        let counters = Arc::new(HubCounters::default());

        let handle = HubHandle {
            register: register_tx,
            unregister: unregister_tx,
            input: input_tx,
            projectile: projectile_tx,
            broadcast: broadcast_tx,
            control: control_tx,
            world: Arc::clone(&world),
            counters: Arc::clone(&counters),
        };

        let hub = Hub {
            config: Arc::new(config),
            world,
            sessions: SessionRegistry::new(),
            intake: Intake {
                register: register_rx,
                unregister: unregister_rx,
                input: input_rx,
                projectile: projectile_rx,
                broadcast: broadcast_rx,
                control: control_rx,
            },
            counters,
            tick_count: 0,
            running: true,
        };

        Ok((hub, handle))
    }

    /// Builds a hub and runs it on its own task.
    pub fn spawn(config: GameConfig) -> Result<(HubHandle, JoinHandle<()>), ConfigError> {
        let (hub, handle) = Hub::new(config)?;
        Ok((handle, tokio::spawn(hub.run())))
    }

    /// Main event loop. Returns after a shutdown request or once every
    /// handle has been dropped; all remaining sessions are closed on exit.
    pub async fn run(mut self) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Hub running at {} Hz, world {:?}",
            self.config.tick_rate, self.config.world_bounds
        );

        while self.running {
            tokio::select! {
                biased;

                _ = ticker.tick() => {
                    self.tick().await;
                }

                session = self.intake.register.recv() => match session {
                    Some(session) => self.handle_register(session).await,
                    None => {
                        info!("All hub handles dropped, stopping");
                        self.running = false;
                    }
                },

                Some(session_id) = self.intake.unregister.recv() => {
                    self.unregister(&session_id, DisconnectReason::Graceful).await;
                }

                Some(event) = self.intake.input.recv() => {
                    self.handle_input(event).await;
                }

                Some(event) = self.intake.projectile.recv() => {
                    self.handle_projectile(event).await;
                }

                Some(payload) = self.intake.broadcast.recv() => {
                    self.deliver(payload, None).await;
                }

                Some(control) = self.intake.control.recv() => {
                    self.handle_control(control).await;
                }
            }
        }

        self.close_all().await;
        info!("Hub stopped after {} ticks", self.tick_count);
    }

    /// One broadcast step: drain pending intake, expire stale state, then
    /// fan a single serialized snapshot out to every session.
    pub async fn tick(&mut self) {
        self.drain_intake().await;
        self.evict_idle().await;

        if let Some(lifetime) = self.config.projectile_lifetime {
            let expired = self
                .world
                .write()
                .await
                .expire_projectiles(SystemTime::now(), lifetime);
            if expired > 0 {
                debug!("Expired {} projectiles", expired);
            }
        }

        let snapshot = self.world.read().await.snapshot();
        self.tick_count += 1;
        self.counters.record_tick();

        if let Some(payload) = encode(&snapshot.to_message()) {
            self.deliver(payload, None).await;
        }

        if self.tick_count % (u64::from(self.config.tick_rate) * 10) == 0 {
            debug!(
                "Tick {}: {} sessions, {} players, {} projectiles",
                self.tick_count,
                self.sessions.len(),
                snapshot.players.len(),
                snapshot.projectiles.len()
            );
        }
    }

    /// Processes everything currently queued, taking at most one queue's
    /// capacity from each so a flood cannot starve the tick. Returns the
    /// number of events handled.
    pub async fn drain_intake(&mut self) -> usize {
        let mut handled = 0;

        for _ in 0..REGISTER_QUEUE_CAPACITY {
            let Ok(session) = self.intake.register.try_recv() else { break };
            self.handle_register(session).await;
            handled += 1;
        }
        for _ in 0..INPUT_QUEUE_CAPACITY {
            let Ok(event) = self.intake.input.try_recv() else { break };
            self.handle_input(event).await;
            handled += 1;
        }
        for _ in 0..PROJECTILE_QUEUE_CAPACITY {
            let Ok(event) = self.intake.projectile.try_recv() else { break };
            self.handle_projectile(event).await;
            handled += 1;
        }
        for _ in 0..UNREGISTER_QUEUE_CAPACITY {
            let Ok(session_id) = self.intake.unregister.try_recv() else { break };
            self.unregister(&session_id, DisconnectReason::Graceful).await;
            handled += 1;
        }
        for _ in 0..BROADCAST_QUEUE_CAPACITY {
            let Ok(payload) = self.intake.broadcast.try_recv() else { break };
            self.deliver(payload, None).await;
            handled += 1;
        }
        for _ in 0..CONTROL_QUEUE_CAPACITY {
            let Ok(control) = self.intake.control.try_recv() else { break };
            self.handle_control(control).await;
            handled += 1;
        }

        handled
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn handle_register(&mut self, session: Session) {
        let session_id = session.id().to_string();
        if !self.sessions.insert(session) {
            warn!("Session {} is already registered, ignoring", session_id);
            return;
        }
        self.counters.record_connection();

        let joined = {
            let mut world = self.world.write().await;
            if world.player_count() < self.config.max_players {
                // Player ids are the id of the session that owns them
                Some(world.add_player(session_id.clone()))
            } else {
                None
            }
        };

        match joined {
            Some(player) => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.bind(player.id.clone());
                }
                info!(
                    "Player {} joined at ({:.2}, {:.2})",
                    player.id, player.pos_x, player.pos_y
                );

                let assigned = ServerMessage::PlayerId {
                    player_id: player.id.clone(),
                };
                if let Some(payload) = encode(&assigned) {
                    self.send_to_session(&session_id, payload).await;
                }
                if !self.sessions.contains(&session_id) {
                    // Already gone; its departure has been announced instead
                    return;
                }

                let announce = ServerMessage::PlayerJoined {
                    player_id: player.id.clone(),
                    pos_x: player.pos_x,
                    pos_y: player.pos_y,
                };
                if let Some(payload) = encode(&announce) {
                    self.deliver(payload, Some(session_id.as_str())).await;
                }
            }
            None => {
                warn!(
                    "Server full ({} players), session {} joins as spectator",
                    self.config.max_players, session_id
                );
                let notice = ServerMessage::Error {
                    code: ERROR_SERVER_FULL,
                    message: "server full".to_string(),
                };
                if let Some(payload) = encode(&notice) {
                    self.send_to_session(&session_id, payload).await;
                }
            }
        }

        if self.sessions.contains(&session_id) {
            let snapshot = self.world.read().await.snapshot();
            if let Some(payload) = encode(&snapshot.to_message()) {
                self.send_to_session(&session_id, payload).await;
            }
        }

        self.publish_population().await;
    }

    async fn handle_input(&mut self, event: InputEvent) {
        self.counters.record_inbound();
        // Player ids are the id of the session that owns them
        match self.sessions.get_mut(&event.player_id) {
            Some(session) => {
                session.touch();
                if session.state() != SessionState::Bound {
                    debug!("Input from unbound session {} ignored", event.player_id);
                    return;
                }
            }
            None => {
                debug!("Input for unknown session {} ignored", event.player_id);
                return;
            }
        }

        let outcome = self
            .world
            .write()
            .await
            .apply_movement(&event.player_id, event.input, SystemTime::now());
        if outcome == MoveOutcome::Clamped {
            debug!("Player {} held at world edge", event.player_id);
        }
    }

    async fn handle_projectile(&mut self, event: ProjectileEvent) {
        self.counters.record_inbound();
        let Some(session) = self.sessions.get_mut(&event.session_id) else {
            debug!("Projectile from unknown session {} ignored", event.session_id);
            return;
        };
        session.touch();

        let owner = match (session.state(), session.player_id()) {
            (SessionState::Bound, Some(player_id)) => player_id.to_string(),
            _ => {
                debug!("Spectator {} cannot spawn projectiles", event.session_id);
                return;
            }
        };

        let projectile_id = event.spec.id.clone();
        let outcome = self
            .world
            .write()
            .await
            .spawn_projectile(&owner, event.spec, SystemTime::now());
        if outcome == SpawnOutcome::Created {
            debug!("Projectile {} spawned by {}", projectile_id, owner);
        }
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Kick(session_id) => {
                self.unregister(&session_id, DisconnectReason::Kicked).await;
            }
            Control::Touch(session_id) => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.touch();
                }
            }
            Control::SendTo {
                session_id,
                payload,
            } => {
                self.send_to_session(&session_id, payload).await;
            }
            Control::Shutdown => {
                info!("Hub shutdown requested");
                self.running = false;
            }
        }
    }

    /// Removes a session and announces its player's departure. Unknown or
    /// already-removed ids are a no-op.
    async fn unregister(&mut self, session_id: &str, reason: DisconnectReason) {
        if let Some(notice) = self.remove_session(session_id, reason).await {
            self.deliver(notice, None).await;
        }
    }

    /// Takes the session out of the registry and its player out of the world,
    /// returning the departure notice to broadcast if a player was bound.
    async fn remove_session(&mut self, session_id: &str, reason: DisconnectReason) -> Option<Outbound> {
        let Some(mut session) = self.sessions.remove(session_id) else {
            debug!("Session {} already removed", session_id);
            return None;
        };

        let player_id = session.begin_unregister();
        session.close();
        info!("Session {} closed: {}", session_id, reason.as_str());

        let notice = match player_id {
            Some(player_id) => {
                self.world.write().await.remove_player(&player_id);
                encode(&ServerMessage::PlayerLeft { player_id })
            }
            None => None,
        };

        self.publish_population().await;
        notice
    }

    /// Fans `payload` out, evicting any session that cannot take it. The
    /// departures caused by eviction are themselves fanned out the same way.
    async fn deliver(&mut self, payload: Outbound, exclude: Option<&str>) {
        let mut stalled = self.sessions.fan_out(&payload, exclude);

        while let Some((session_id, err)) = stalled.pop() {
            if !self.sessions.contains(&session_id) {
                continue;
            }
            let reason = self.record_delivery_failure(&session_id, err);
            if let Some(notice) = self.remove_session(&session_id, reason).await {
                stalled.extend(self.sessions.fan_out(&notice, None));
            }
        }
    }

    async fn send_to_session(&mut self, session_id: &str, payload: Outbound) {
        let result = match self.sessions.get(session_id) {
            Some(session) => session.try_send(payload),
            None => {
                debug!("No session {} to send to", session_id);
                return;
            }
        };

        if let Err(err) = result {
            let reason = self.record_delivery_failure(session_id, err);
            self.unregister(session_id, reason).await;
        }
    }

    fn record_delivery_failure(&self, session_id: &str, err: DeliveryError) -> DisconnectReason {
        match err {
            DeliveryError::Full => {
                warn!("Session {} outbound queue full, evicting", session_id);
                self.counters.record_eviction();
                DisconnectReason::Backpressure
            }
            DeliveryError::Closed => {
                debug!("Session {} writer already gone", session_id);
                DisconnectReason::Graceful
            }
        }
    }

    async fn evict_idle(&mut self) {
        let Some(timeout) = self.config.idle_timeout else {
            return;
        };
        for session_id in self.sessions.timed_out(timeout) {
            warn!("Session {} idle for over {:?}", session_id, timeout);
            self.unregister(&session_id, DisconnectReason::IdleTimeout).await;
        }
    }

    async fn publish_population(&self) {
        let players = self.world.read().await.player_count();
        self.counters.set_population(self.sessions.len(), players);
    }

    async fn close_all(&mut self) {
        let mut world = self.world.write().await;
        for mut session in self.sessions.drain() {
            if let Some(player_id) = session.begin_unregister() {
                world.remove_player(&player_id);
            }
            debug!(
                "Session {} closed: {}",
                session.id(),
                DisconnectReason::Shutdown.as_str()
            );
            session.close();
        }
        self.counters.set_population(0, world.player_count());
    }
}

/// Serializes once so fan-out shares the bytes instead of re-encoding.
fn encode(message: &ServerMessage) -> Option<Outbound> {
    match message.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to encode outbound message: {}", e);
            None
        }
    }
}

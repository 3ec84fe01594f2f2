//! Authoritative world state: players, projectiles and the rules that mutate them.
//!
//! Only the hub loop holds a mutable reference to [`WorldState`]. Everything
//! handed to other tasks is a [`WorldSnapshot`], an owned deep copy.

use crate::config::{GameConfig, WorldBounds};
use log::{debug, info, warn};
use shared::{timestamp_secs, PlayerView, ProjectileView, ServerMessage, ShootMessage};
use std::collections::HashMap;
use std::time::SystemTime;

pub type PlayerId = String;
pub type ProjectileId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub pos_x: f64,
    pub pos_y: f64,
    /// Last accepted movement intent, each axis in `[-1, 1]`.
    pub move_x: f64,
    pub move_y: f64,
    pub facing_left: bool,
    pub move_speed: f64,
    pub health: i32,
    pub max_health: i32,
    pub is_alive: bool,
    pub last_update: SystemTime,
}

impl PlayerState {
    pub fn new(id: PlayerId, pos_x: f64, pos_y: f64, move_speed: f64, health: i32) -> Self {
        Self {
            id,
            pos_x,
            pos_y,
            move_x: 0.0,
            move_y: 0.0,
            facing_left: false,
            move_speed,
            health,
            max_health: health,
            is_alive: true,
            last_update: SystemTime::now(),
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id.clone(),
            pos_x: self.pos_x,
            pos_y: self.pos_y,
            move_x: self.move_x,
            move_y: self.move_y,
            facing_left: self.facing_left,
            move_speed: self.move_speed,
            health: self.health,
            max_health: self.max_health,
            is_alive: self.is_alive,
            last_update: timestamp_secs(self.last_update),
        }
    }
}

/// A movement request after decoding, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveInput {
    pub move_x: f64,
    pub move_y: f64,
    pub facing_left: bool,
}

impl MoveInput {
    /// Both axes must lie in `[-1, 1]`; NaN fails the range check.
    pub fn is_valid(&self) -> bool {
        (-1.0..=1.0).contains(&self.move_x) && (-1.0..=1.0).contains(&self.move_y)
    }
}

/// Client-supplied projectile parameters. The owner is never taken from here.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileSpec {
    pub id: ProjectileId,
    pub pos_x: f64,
    pub pos_y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
    pub speed: f64,
}

impl ProjectileSpec {
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && [self.pos_x, self.pos_y, self.dir_x, self.dir_y, self.speed]
                .iter()
                .all(|v| v.is_finite())
            && self.speed >= 0.0
    }
}

impl From<ShootMessage> for ProjectileSpec {
    fn from(msg: ShootMessage) -> Self {
        Self {
            id: msg.projectile_id,
            pos_x: msg.pos_x,
            pos_y: msg.pos_y,
            dir_x: msg.dir_x,
            dir_y: msg.dir_y,
            speed: msg.speed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileState {
    pub id: ProjectileId,
    pub owner_id: PlayerId,
    pub pos_x: f64,
    pub pos_y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
    pub speed: f64,
    pub created_at: SystemTime,
}

impl ProjectileState {
    pub fn view(&self) -> ProjectileView {
        ProjectileView {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            pos_x: self.pos_x,
            pos_y: self.pos_y,
            dir_x: self.dir_x,
            dir_y: self.dir_y,
            speed: self.speed,
            created_at: timestamp_secs(self.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Applied,
    /// Applied, but the position was pulled back inside the world bounds.
    Clamped,
    Rejected,
    UnknownPlayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Created,
    /// An existing projectile with the same id was overwritten.
    Replaced,
    Rejected,
}

/// Owned, immutable copy of the world at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub players: HashMap<PlayerId, PlayerState>,
    pub projectiles: HashMap<ProjectileId, ProjectileState>,
    pub last_update: SystemTime,
}

impl WorldSnapshot {
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::GameState {
            players: self
                .players
                .iter()
                .map(|(id, p)| (id.clone(), p.view()))
                .collect(),
            projectiles: self
                .projectiles
                .iter()
                .map(|(id, p)| (id.clone(), p.view()))
                .collect(),
            timestamp: timestamp_secs(self.last_update),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorldState {
    players: HashMap<PlayerId, PlayerState>,
    projectiles: HashMap<ProjectileId, ProjectileState>,
    last_update: SystemTime,
    bounds: WorldBounds,
    move_speed: f64,
    player_health: i32,
    step_secs: f64,
}

impl WorldState {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            players: HashMap::new(),
            projectiles: HashMap::new(),
            last_update: SystemTime::now(),
            bounds: config.world_bounds,
            move_speed: config.move_speed,
            player_health: config.player_health,
            step_secs: config.tick_seconds(),
        }
    }

    /// Spawns a player at the origin, pulled inside the bounds if the origin
    /// lies outside them. Replaces any player already stored under `id`.
    pub fn add_player(&mut self, id: PlayerId) -> PlayerState {
        let (x, y) = self.bounds.clamp_position(0.0, 0.0);
        let player = PlayerState::new(id.clone(), x, y, self.move_speed, self.player_health);

        info!("Added player {} at ({}, {})", id, player.pos_x, player.pos_y);
        self.last_update = player.last_update;
        self.players.insert(id, player.clone());
        player
    }

    pub fn remove_player(&mut self, id: &str) -> Option<PlayerState> {
        let removed = self.players.remove(id);
        if removed.is_some() {
            info!("Removed player {}", id);
            self.last_update = SystemTime::now();
        }
        removed
    }

    pub fn player(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn projectile(&self, id: &str) -> Option<&ProjectileState> {
        self.projectiles.get(id)
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    pub fn last_update(&self) -> SystemTime {
        self.last_update
    }

    /// Advances a player by one tick of movement at the given intent.
    ///
    /// Out-of-range intent is dropped without touching any field. The position
    /// is clamped per axis; intent and facing are stored even when clamped.
    pub fn apply_movement(&mut self, id: &str, input: MoveInput, now: SystemTime) -> MoveOutcome {
        if !input.is_valid() {
            warn!(
                "Invalid movement input from {}: ({}, {})",
                id, input.move_x, input.move_y
            );
            return MoveOutcome::Rejected;
        }

        let Some(player) = self.players.get_mut(id) else {
            debug!("Movement for unknown player {} ignored", id);
            return MoveOutcome::UnknownPlayer;
        };

        let raw_x = player.pos_x + input.move_x * player.move_speed * self.step_secs;
        let raw_y = player.pos_y + input.move_y * player.move_speed * self.step_secs;
        let (new_x, new_y) = self.bounds.clamp_position(raw_x, raw_y);

        player.pos_x = new_x;
        player.pos_y = new_y;
        player.move_x = input.move_x;
        player.move_y = input.move_y;
        player.facing_left = input.facing_left;
        player.last_update = now;
        self.last_update = now;

        if new_x != raw_x || new_y != raw_y {
            MoveOutcome::Clamped
        } else {
            MoveOutcome::Applied
        }
    }

    /// Stores a projectile under its client-supplied id, last write wins.
    pub fn spawn_projectile(
        &mut self,
        owner_id: &str,
        spec: ProjectileSpec,
        now: SystemTime,
    ) -> SpawnOutcome {
        if !spec.is_valid() {
            warn!("Invalid projectile {:?} from {}", spec.id, owner_id);
            return SpawnOutcome::Rejected;
        }

        let projectile = ProjectileState {
            id: spec.id.clone(),
            owner_id: owner_id.to_string(),
            pos_x: spec.pos_x,
            pos_y: spec.pos_y,
            dir_x: spec.dir_x,
            dir_y: spec.dir_y,
            speed: spec.speed,
            created_at: now,
        };
        self.last_update = now;

        match self.projectiles.insert(spec.id, projectile) {
            Some(previous) => {
                debug!(
                    "Projectile {} from {} replaced one owned by {}",
                    previous.id, owner_id, previous.owner_id
                );
                SpawnOutcome::Replaced
            }
            None => SpawnOutcome::Created,
        }
    }

    /// Drops every projectile that has lived at least `lifetime`. Returns how many went.
    pub fn expire_projectiles(&mut self, now: SystemTime, lifetime: std::time::Duration) -> usize {
        let before = self.projectiles.len();
        self.projectiles.retain(|_, p| {
            now.duration_since(p.created_at)
                .map(|age| age < lifetime)
                .unwrap_or(true)
        });
        let expired = before - self.projectiles.len();
        if expired > 0 {
            self.last_update = now;
        }
        expired
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            players: self.players.clone(),
            projectiles: self.projectiles.clone(),
            last_update: self.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::Duration;

    fn test_world() -> WorldState {
        WorldState::new(&GameConfig::default())
    }

    fn step() -> f64 {
        GameConfig::default().tick_seconds()
    }

    fn input(move_x: f64, move_y: f64) -> MoveInput {
        MoveInput {
            move_x,
            move_y,
            facing_left: false,
        }
    }

    fn spec(id: &str) -> ProjectileSpec {
        ProjectileSpec {
            id: id.to_string(),
            pos_x: 1.0,
            pos_y: 2.0,
            dir_x: 1.0,
            dir_y: 0.0,
            speed: 20.0,
        }
    }

    #[test]
    fn test_add_player_spawns_at_origin() {
        let mut world = test_world();
        let player = world.add_player("a".to_string());

        assert_eq!(player.pos_x, 0.0);
        assert_eq!(player.pos_y, 0.0);
        assert_eq!(player.health, 100);
        assert_eq!(player.max_health, 100);
        assert!(player.is_alive);
        assert_eq!(world.player_count(), 1);
    }

    #[test]
    fn test_add_player_clamps_spawn_into_bounds() {
        let mut config = GameConfig::default();
        config.world_bounds = WorldBounds {
            min_x: 10.0,
            max_x: 20.0,
            min_y: -20.0,
            max_y: -10.0,
        };
        let mut world = WorldState::new(&config);

        let player = world.add_player("a".to_string());
        assert_eq!((player.pos_x, player.pos_y), (10.0, -10.0));
    }

    #[test]
    fn test_apply_movement_moves_one_step() {
        let mut world = test_world();
        world.add_player("a".to_string());

        let outcome = world.apply_movement("a", input(1.0, -1.0), SystemTime::now());
        assert_eq!(outcome, MoveOutcome::Applied);

        let player = world.player("a").unwrap();
        assert_approx_eq!(player.pos_x, 5.0 * step());
        assert_approx_eq!(player.pos_y, -5.0 * step());
        assert_eq!(player.move_x, 1.0);
        assert_eq!(player.move_y, -1.0);
    }

    #[test]
    fn test_apply_movement_rejects_out_of_range() {
        let mut world = test_world();
        world.add_player("a".to_string());
        let before = world.player("a").unwrap().clone();
        let world_before = world.last_update();

        let later = SystemTime::now() + Duration::from_secs(5);
        for bad in [input(1.5, 0.0), input(0.0, -1.01), input(f64::NAN, 0.0)] {
            assert_eq!(world.apply_movement("a", bad, later), MoveOutcome::Rejected);
        }

        assert_eq!(world.player("a").unwrap(), &before);
        assert_eq!(world.last_update(), world_before);
    }

    #[test]
    fn test_apply_movement_unknown_player_is_noop() {
        let mut world = test_world();
        let before = world.last_update();

        let outcome = world.apply_movement("ghost", input(1.0, 0.0), SystemTime::now());
        assert_eq!(outcome, MoveOutcome::UnknownPlayer);
        assert_eq!(world.player_count(), 0);
        assert_eq!(world.last_update(), before);
    }

    #[test]
    fn test_apply_movement_clamps_and_keeps_intent() {
        let mut config = GameConfig::default();
        config.world_bounds.max_x = 0.1;
        let mut world = WorldState::new(&config);
        world.add_player("a".to_string());

        let now = SystemTime::now();
        let outcome = world.apply_movement(
            "a",
            MoveInput {
                move_x: 1.0,
                move_y: 0.0,
                facing_left: true,
            },
            now,
        );
        assert_eq!(outcome, MoveOutcome::Clamped);

        let player = world.player("a").unwrap();
        assert_eq!(player.pos_x, 0.1);
        assert_eq!(player.move_x, 1.0);
        assert!(player.facing_left);
        assert_eq!(player.last_update, now);
        assert_eq!(world.last_update(), now);
    }

    #[test]
    fn test_bounds_invariant_under_random_movement() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut world = test_world();
        world.add_player("a".to_string());
        world.add_player("b".to_string());
        let bounds = WorldBounds::default();

        for _ in 0..20_000 {
            let id = if rng.gen_bool(0.5) { "a" } else { "b" };
            let mv = input(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0));
            world.apply_movement(id, mv, SystemTime::now());

            let p = world.player(id).unwrap();
            assert!(bounds.contains(p.pos_x, p.pos_y), "{:?} escaped", p);
        }
    }

    #[test]
    fn test_long_run_reaches_edge_exactly() {
        let mut world = test_world();
        world.add_player("a".to_string());

        // 50 units at 5 u/s needs 10 s, i.e. 300 ticks; overshoot on purpose.
        for _ in 0..400 {
            world.apply_movement("a", input(1.0, 1.0), SystemTime::now());
        }

        let p = world.player("a").unwrap();
        assert_eq!(p.pos_x, 50.0);
        assert_eq!(p.pos_y, 50.0);
    }

    #[test]
    fn test_spawn_projectile_last_write_wins() {
        let mut world = test_world();
        let now = SystemTime::now();

        assert_eq!(
            world.spawn_projectile("a", spec("p1"), now),
            SpawnOutcome::Created
        );

        let mut second = spec("p1");
        second.speed = 99.0;
        assert_eq!(
            world.spawn_projectile("b", second, now),
            SpawnOutcome::Replaced
        );

        let p = world.projectile("p1").unwrap();
        assert_eq!(world.projectile_count(), 1);
        assert_eq!(p.owner_id, "b");
        assert_eq!(p.speed, 99.0);
        assert_eq!(p.created_at, now);
    }

    #[test]
    fn test_spawn_projectile_rejects_garbage() {
        let mut world = test_world();
        let now = SystemTime::now();

        let mut nan = spec("p1");
        nan.dir_x = f64::NAN;
        let mut negative = spec("p2");
        negative.speed = -1.0;

        assert_eq!(world.spawn_projectile("a", nan, now), SpawnOutcome::Rejected);
        assert_eq!(world.spawn_projectile("a", negative, now), SpawnOutcome::Rejected);
        assert_eq!(world.spawn_projectile("a", spec(""), now), SpawnOutcome::Rejected);
        assert_eq!(world.projectile_count(), 0);
    }

    #[test]
    fn test_expire_projectiles() {
        let mut world = test_world();
        let start = SystemTime::now();
        world.spawn_projectile("a", spec("old"), start);
        world.spawn_projectile("a", spec("new"), start + Duration::from_secs(4));

        let expired = world.expire_projectiles(start + Duration::from_secs(5), Duration::from_secs(5));
        assert_eq!(expired, 1);
        assert!(world.projectile("old").is_none());
        assert!(world.projectile("new").is_some());
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mut world = test_world();
        world.add_player("a".to_string());
        world.spawn_projectile("a", spec("p1"), SystemTime::now());

        let snapshot = world.snapshot();
        let frozen = snapshot.clone();
        assert!(!std::ptr::eq(&snapshot.players["a"], world.player("a").unwrap()));

        world.apply_movement("a", input(1.0, 1.0), SystemTime::now());
        world.spawn_projectile("a", spec("p2"), SystemTime::now());
        world.remove_player("a");

        assert_eq!(snapshot, frozen);
        assert_eq!(snapshot.players["a"].pos_x, 0.0);
        assert_eq!(snapshot.projectiles.len(), 1);
    }

    #[test]
    fn test_snapshot_to_message() {
        let mut world = test_world();
        world.add_player("a".to_string());
        world.spawn_projectile("a", spec("p1"), SystemTime::now());

        match world.snapshot().to_message() {
            ServerMessage::GameState {
                players,
                projectiles,
                timestamp,
            } => {
                assert_eq!(players["a"].id, "a");
                assert_eq!(projectiles["p1"].owner_id, "a");
                assert!(timestamp > 0.0);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_remove_player() {
        let mut world = test_world();
        world.add_player("a".to_string());

        assert!(world.remove_player("a").is_some());
        assert!(world.remove_player("a").is_none());
        assert_eq!(world.player_count(), 0);
    }
}

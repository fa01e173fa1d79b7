//! Round life-cycle: `waiting -> enter -> starting -> started -> waiting`.
//!
//! `RoundManager` owns the physics world, the marble registry, the round
//! timers and the pending sync deltas. It never sleeps or does I/O; the game
//! loop drives it with the current instant and drains its outputs.

use crate::color::random_marble_color;
use crate::config::ServerConfig;
use crate::level::LevelData;
use crate::physics::{GateState, MarbleMeta, MarbleRegistry, PhysicsError, PhysicsWorld};
use crate::score;
use crate::sync::SyncBroadcaster;
use crate::timers::{RoundTimer, Timers};
use marble_shared::config::GameplayParams;
use marble_shared::protocol::Snapshot;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

pub use marble_shared::protocol::GameStateName as RoundState;

pub const BOT_NAME: &str = "Nightbot";

pub const LIMIT_REACHED_NOTICE: &str =
    "The maximum amount of marbles has been hit! No more marbles can be entered for this round.";

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Statistics of one race, handed to persistence when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub map_id: String,
    /// Unix ms
    pub start: Option<u64>,
    /// Unix ms
    pub end: Option<u64>,
    /// Winning time in ms
    pub duration: Option<u64>,
    pub points_awarded: u64,
    pub players_entered: usize,
    pub players_finished: usize,
    pub players_not_finished: usize,
    pub marbles_entered: usize,
    pub marbles_finished: usize,
    pub marbles_not_finished: usize,
}

impl Round {
    pub fn new(map_id: &str) -> Self {
        Self {
            map_id: map_id.to_string(),
            start: None,
            end: None,
            duration: None,
            points_awarded: 0,
            players_entered: 0,
            players_finished: 0,
            players_not_finished: 0,
            marbles_entered: 0,
            marbles_finished: 0,
            marbles_not_finished: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    pub id: String,
    pub points_earned: u64,
    pub finished: bool,
    pub marbles_entered: usize,
    pub marbles_finished: usize,
}

/// A finished round waiting to be recorded.
#[derive(Debug, Clone)]
pub struct CompletedRound {
    pub round: Round,
    pub players: Vec<PlayerEntry>,
}

/// The parts of `ServerConfig` the state machine needs.
#[derive(Debug, Clone)]
pub struct RoundRules {
    pub max_player_count: usize,
    pub max_marble_count: usize,
    pub start_delay: Duration,
    pub finish_check_interval: Duration,
    pub all_finished_grace: Duration,
}

impl From<&ServerConfig> for RoundRules {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_player_count: config.max_player_count,
            max_marble_count: config.max_marble_count,
            start_delay: config.start_delay,
            finish_check_interval: config.finish_check_interval,
            all_finished_grace: config.all_finished_grace,
        }
    }
}

pub struct RoundManager {
    rules: RoundRules,
    gameplay: GameplayParams,
    level_id: String,
    state: RoundState,
    /// Bumped on every `end()`; timers from older generations are ignored
    generation: u64,
    world: PhysicsWorld,
    marbles: MarbleRegistry,
    timers: Timers,
    sync: SyncBroadcaster,
    players: Vec<PlayerEntry>,
    round: Round,
    marbles_finished: usize,
    limit_reached: bool,
    start_time: Option<Instant>,
    rng: ChaCha8Rng,
    completed: Vec<CompletedRound>,
    notifications: Vec<String>,
}

impl RoundManager {
    pub fn new(config: &ServerConfig, level: &LevelData) -> Result<Self, PhysicsError> {
        let world = PhysicsWorld::from_level(level, config.gravity, config.physics_rate_hz)?;
        let marbles = MarbleRegistry::new(
            config.marble_radius,
            config.marble_density,
            level.spawn_area,
            level.finish_area,
        );
        let mut sync = SyncBroadcaster::new(
            level.gameplay.entry_period_length,
            level.gameplay.finish_period_length,
            &level.id,
        );
        sync.set_state(RoundState::Waiting, None);

        Ok(Self {
            rules: RoundRules::from(config),
            gameplay: level.gameplay,
            level_id: level.id.clone(),
            state: RoundState::Waiting,
            generation: 0,
            world,
            marbles,
            timers: Timers::new(),
            sync,
            players: Vec::new(),
            round: Round::new(&level.id),
            marbles_finished: 0,
            limit_reached: false,
            start_time: None,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            completed: Vec::new(),
            notifications: Vec::new(),
        })
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn players(&self) -> &[PlayerEntry] {
        &self.players
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn marbles(&self) -> &MarbleRegistry {
        &self.marbles
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn level_id(&self) -> &str {
        &self.level_id
    }

    fn set_state(&mut self, state: RoundState, now: Instant) {
        self.state = state;
        let context = self.state_context(now);
        self.sync.set_state(state, context);
        tracing::info!("Current state: {}", state);
    }

    /// Remaining enter period while entering, race time while racing.
    pub fn state_context(&self, now: Instant) -> Option<u64> {
        match self.state {
            RoundState::Enter => self
                .timers
                .deadline(RoundTimer::EnterPeriod)
                .map(|at| millis(at.saturating_duration_since(now))),
            RoundState::Started => self
                .start_time
                .map(|start| millis(now.saturating_duration_since(start))),
            RoundState::Waiting | RoundState::Starting => None,
        }
    }

    /// Enters a player into the round. Returns whether the entry was accepted.
    pub fn add_player_entry(
        &mut self,
        id: &str,
        name: &str,
        color: Option<&str>,
        now: Instant,
    ) -> bool {
        if !matches!(self.state, RoundState::Waiting | RoundState::Enter) {
            return false;
        }
        if self.players.len() >= self.rules.max_player_count
            || self.marbles.len() >= self.rules.max_marble_count
        {
            return false;
        }
        if self.players.iter().any(|p| p.id == id) {
            return false;
        }

        // One point just for entering
        self.players.push(PlayerEntry {
            id: id.to_string(),
            points_earned: 1,
            finished: false,
            marbles_entered: 1,
            marbles_finished: 0,
        });
        tracing::info!("{} ({}) entered the round", name, id);

        self.spawn_marble(Some(id), Some(name), color, now);

        // Hitting a cap in spawn_marble already started the race
        if self.state == RoundState::Waiting {
            self.timers.arm(
                RoundTimer::EnterPeriod,
                self.generation,
                now + self.gameplay.entry_period(),
            );
            self.set_state(RoundState::Enter, now);
        }
        true
    }

    /// Spawns a marble, a bot when `id` is None. No-op once the marble cap is
    /// reached. Returns the new entry id.
    pub fn spawn_marble(
        &mut self,
        id: Option<&str>,
        name: Option<&str>,
        color: Option<&str>,
        now: Instant,
    ) -> Option<usize> {
        if self.marbles.len() >= self.rules.max_marble_count {
            return None;
        }

        let meta = MarbleMeta {
            user_id: id.map(str::to_string),
            name: name.unwrap_or(BOT_NAME).to_string(),
            color: match color {
                Some(color) => color.to_string(),
                None => random_marble_color(&mut self.rng),
            },
        };
        let marble = self.marbles.create_marble(&mut self.world, meta, &mut self.rng);
        self.sync.marble_entered(marble);
        let entry_id = marble.entry_id;
        let body = marble.body;

        // Late spawns miss activate_all
        if self.state == RoundState::Started {
            if let Some(body) = self.world.body_mut(body) {
                body.wake_up(true);
            }
        }

        let cap_hit = self.marbles.len() >= self.rules.max_marble_count
            || self.players.len() >= self.rules.max_player_count;
        if cap_hit && !self.limit_reached {
            self.limit_reached = true;
            self.notifications.push(LIMIT_REACHED_NOTICE.to_string());
            tracing::info!(
                "Entry limit reached ({} players, {} marbles)",
                self.players.len(),
                self.marbles.len()
            );
            self.start(now);
        }
        Some(entry_id)
    }

    /// Spawns up to `count` bots.
    pub fn spawn_bots(&mut self, count: usize, now: Instant) -> usize {
        (0..count)
            .filter_map(|_| self.spawn_marble(None, None, None, now))
            .count()
    }

    /// Closes entries and schedules the race start. Only valid from `enter`
    /// or `waiting`.
    pub fn start(&mut self, now: Instant) -> bool {
        if !matches!(self.state, RoundState::Enter | RoundState::Waiting) {
            return false;
        }
        self.timers.cancel(RoundTimer::EnterPeriod);
        self.timers.arm(
            RoundTimer::StartDelay,
            self.generation,
            now + self.rules.start_delay,
        );
        self.set_state(RoundState::Starting, now);
        true
    }

    fn race_started(&mut self, now: Instant) {
        if self.state != RoundState::Starting {
            return;
        }
        self.start_time = Some(now);
        self.round.start = Some(unix_millis());
        self.set_state(RoundState::Started, now);

        self.world.set_all_gates(GateState::Open);
        self.marbles.activate_all(&mut self.world);
        tracing::debug!(
            "Released {} marbles at physics frame {}",
            self.marbles.len(),
            self.world.current_frame()
        );

        self.timers.arm(
            RoundTimer::FinishCheck,
            self.generation,
            now + self.rules.finish_check_interval,
        );
        self.timers.arm(
            RoundTimer::MaxLength,
            self.generation,
            now + self.gameplay.round_duration(),
        );
    }

    /// Ranks and scores marbles that crossed the finish since the last poll.
    pub fn check_finished(&mut self, now: Instant) {
        if self.state != RoundState::Started {
            return;
        }
        let Some(start_time) = self.start_time else {
            return;
        };
        let time = millis(now.saturating_duration_since(start_time));
        let human_count = self.players.len();

        for entry_id in self.marbles.get_finished_marbles(&self.world) {
            let rank = self.marbles_finished;
            self.marbles_finished += 1;

            let Some(marble) = self.marbles.get_mut(entry_id) else {
                continue;
            };
            marble.rank = Some(rank);
            marble.time = Some(time);
            let owner = marble.user_id.clone();

            let points = u64::from(score::points(rank, human_count));
            if let Some(player) = owner
                .as_deref()
                .and_then(|id| self.players.iter_mut().find(|p| p.id == id))
            {
                player.finished = true;
                player.marbles_finished += 1;
                player.points_earned += points;
                self.round.points_awarded += points;
            }
            self.round.marbles_finished += 1;
            self.sync.marble_finished(entry_id, time);
            tracing::info!(
                "Marble {} finished: rank {}, {} ms, {} points",
                entry_id,
                rank,
                time,
                points
            );

            if self.round.duration.is_none() {
                self.round.duration = Some(time);
                self.timers.arm(
                    RoundTimer::DnfDeadline,
                    self.generation,
                    now + self.gameplay.dnf_duration(),
                );
            }

            if self.marbles_finished == self.marbles.len() {
                self.timers.arm(
                    RoundTimer::AllFinished,
                    self.generation,
                    now + self.rules.all_finished_grace,
                );
            }
        }
    }

    /// Finalizes and resets the round. Only valid while `started`.
    pub fn end(&mut self, now: Instant) -> bool {
        if self.state != RoundState::Started {
            return false;
        }

        let round = &mut self.round;
        round.end = Some(unix_millis());
        round.players_entered = self.players.len();
        round.players_finished = self.players.iter().filter(|p| p.finished).count();
        round.players_not_finished = round.players_entered - round.players_finished;
        round.marbles_entered = self.marbles.len();
        round.marbles_not_finished = round.marbles_entered - round.marbles_finished;
        tracing::info!(
            "Round over: {}/{} marbles finished, {} points awarded",
            round.marbles_finished,
            round.marbles_entered,
            round.points_awarded
        );

        let fresh = Round::new(&self.level_id);
        self.completed.push(CompletedRound {
            round: std::mem::replace(&mut self.round, fresh),
            players: std::mem::take(&mut self.players),
        });

        self.timers.cancel_all();
        self.generation += 1;

        self.world.set_all_gates(GateState::Closed);
        self.marbles.destroy_all_marbles(&mut self.world);
        self.sync.drop_marble_deltas();

        self.marbles_finished = 0;
        self.start_time = None;
        self.limit_reached = false;

        self.set_state(RoundState::Waiting, now);
        true
    }

    fn handle_timer(&mut self, timer: RoundTimer, at: Instant) {
        match timer {
            RoundTimer::EnterPeriod => {
                self.start(at);
            }
            RoundTimer::StartDelay => self.race_started(at),
            RoundTimer::FinishCheck => {
                self.check_finished(at);
                if self.state == RoundState::Started {
                    self.timers.arm(
                        RoundTimer::FinishCheck,
                        self.generation,
                        at + self.rules.finish_check_interval,
                    );
                }
            }
            RoundTimer::DnfDeadline | RoundTimer::MaxLength | RoundTimer::AllFinished => {
                tracing::debug!("{:?} elapsed", timer);
                self.end(at);
            }
        }
    }

    /// Fires every timer due at `now`, each at its own deadline.
    pub fn run_due(&mut self, now: Instant) {
        while let Some((timer, at)) = self.timers.pop_due(now, self.generation) {
            self.handle_timer(timer, at);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn step_physics(&mut self, now: Instant) -> u32 {
        self.world.step_to(now)
    }

    pub fn take_snapshots(&mut self) -> Vec<Snapshot> {
        self.sync.take_snapshots(&self.marbles, &self.world)
    }

    pub fn full_snapshot(&self, now: Instant) -> Snapshot {
        self.sync
            .full_snapshot(self.state, self.state_context(now), &self.marbles, &self.world)
    }

    pub fn take_completed(&mut self) -> Vec<CompletedRound> {
        std::mem::take(&mut self.completed)
    }

    pub fn take_notifications(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notifications)
    }
}

#[cfg(test)]
impl RoundManager {
    /// Moves a marble body in place, bypassing the simulation.
    pub(crate) fn teleport_marble(&mut self, entry_id: usize, position: [f32; 3]) {
        let handle = self.marbles.get(entry_id).map(|marble| marble.body);
        if let Some(body) = handle.and_then(|handle| self.world.body_mut(handle)) {
            let [x, y, z] = position;
            body.set_translation(rapier3d::na::Vector3::new(x, y, z), true);
        }
    }
}

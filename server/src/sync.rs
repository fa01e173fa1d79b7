//! Outbound state deltas.
//!
//! Changes are collected between broadcast ticks and folded into one
//! `Snapshot` per tick. Every session gets the same bytes.

use crate::physics::{Marble, MarbleRegistry, PhysicsWorld};
use marble_shared::protocol::{GameStateName, NewMarbleWire, Snapshot, WireValue};

fn marble_values(marble: &Marble) -> [WireValue; 5] {
    NewMarbleWire {
        entry_id: marble.entry_id as u64,
        user_id: marble.user_id.clone(),
        name: marble.name.clone(),
        size: f64::from(marble.size),
        color: marble.color.clone(),
    }
    .to_values()
}

#[derive(Debug)]
pub struct SyncBroadcaster {
    constants: [f64; 2],
    level_id: String,
    pending: Snapshot,
    /// Snapshots closed early because a second state change arrived
    sealed: Vec<Snapshot>,
}

impl SyncBroadcaster {
    /// The first snapshot carries the constants and the level id.
    pub fn new(entry_period_length: f64, finish_period_length: f64, level_id: &str) -> Self {
        let constants = [entry_period_length, finish_period_length];
        Self {
            constants,
            level_id: level_id.to_string(),
            pending: Snapshot {
                server_constants: Some(constants),
                level_id: Some(level_id.to_string()),
                ..Default::default()
            },
            sealed: Vec::new(),
        }
    }

    /// Queues a state change. Two changes inside one tick are kept apart so
    /// viewers still see every transition.
    pub fn set_state(&mut self, state: GameStateName, context: Option<u64>) {
        if self.pending.game_state.is_some() {
            let sealed = std::mem::take(&mut self.pending);
            self.sealed.push(sealed);
        }
        self.pending.game_state = Some(state);
        self.pending.state_context = context;
    }

    pub fn marble_entered(&mut self, marble: &Marble) {
        self.pending
            .new_marbles
            .get_or_insert_with(Vec::new)
            .extend(marble_values(marble));
    }

    pub fn marble_finished(&mut self, entry_id: usize, time_ms: u64) {
        self.pending
            .finished_marbles
            .get_or_insert_with(Vec::new)
            .extend([entry_id as u64, time_ms]);
    }

    /// Forgets marble deltas of a round that just ended.
    pub fn drop_marble_deltas(&mut self) {
        self.pending.new_marbles = None;
        self.pending.finished_marbles = None;
        for snapshot in &mut self.sealed {
            snapshot.new_marbles = None;
            snapshot.finished_marbles = None;
        }
    }

    /// Everything queued since the last call, with current transforms on the
    /// last snapshot. Empty when there is nothing to send.
    pub fn take_snapshots(
        &mut self,
        marbles: &MarbleRegistry,
        world: &PhysicsWorld,
    ) -> Vec<Snapshot> {
        let mut snapshots = std::mem::take(&mut self.sealed);
        let mut current = std::mem::take(&mut self.pending);
        if !marbles.is_empty() {
            let (positions, rotations) = marbles.transforms(world);
            current.positions = Some(positions);
            current.rotations = Some(rotations);
        }
        if !current.is_empty() {
            snapshots.push(current);
        }
        snapshots.retain(|s| !s.is_empty());
        snapshots
    }

    /// Complete picture for a session that just connected.
    pub fn full_snapshot(
        &self,
        state: GameStateName,
        context: Option<u64>,
        marbles: &MarbleRegistry,
        world: &PhysicsWorld,
    ) -> Snapshot {
        let mut snapshot = Snapshot {
            server_constants: Some(self.constants),
            level_id: Some(self.level_id.clone()),
            game_state: Some(state),
            state_context: context,
            ..Default::default()
        };
        if marbles.is_empty() {
            return snapshot;
        }

        let mut new_marbles = Vec::new();
        let mut finished = Vec::new();
        for marble in marbles.iter() {
            new_marbles.extend(marble_values(marble));
            if let Some(time) = marble.time {
                finished.extend([marble.entry_id as u64, time]);
            }
        }
        let (positions, rotations) = marbles.transforms(world);
        snapshot.new_marbles = Some(new_marbles);
        if !finished.is_empty() {
            snapshot.finished_marbles = Some(finished);
        }
        snapshot.positions = Some(positions);
        snapshot.rotations = Some(rotations);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Aabb;
    use crate::physics::MarbleMeta;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn area() -> Aabb {
        Aabb {
            min: [0.0, 5.0, 0.0],
            max: [1.0, 6.0, 1.0],
        }
    }

    fn far_away() -> Aabb {
        Aabb {
            min: [100.0, 0.0, 100.0],
            max: [101.0, 1.0, 101.0],
        }
    }

    fn spawn(marbles: &mut MarbleRegistry, world: &mut PhysicsWorld, user: Option<&str>) -> Marble {
        let mut rng = ChaCha8Rng::seed_from_u64(marbles.len() as u64);
        marbles
            .create_marble(
                world,
                MarbleMeta {
                    user_id: user.map(str::to_string),
                    name: "m".to_string(),
                    color: "#123456".to_string(),
                },
                &mut rng,
            )
            .clone()
    }

    #[test]
    fn first_snapshot_carries_constants_then_nothing() {
        let world = PhysicsWorld::new(-10.0, 60);
        let marbles = MarbleRegistry::new(0.2, 1.0, area(), far_away());
        let mut sync = SyncBroadcaster::new(20.0, 15.0, "slope");

        let first = sync.take_snapshots(&marbles, &world);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].server_constants, Some([20.0, 15.0]));
        assert_eq!(first[0].level_id.as_deref(), Some("slope"));

        assert!(sync.take_snapshots(&marbles, &world).is_empty());
    }

    #[test]
    fn new_and_finished_marbles_are_flat() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut marbles = MarbleRegistry::new(0.2, 1.0, area(), far_away());
        let mut sync = SyncBroadcaster::new(20.0, 15.0, "slope");
        sync.take_snapshots(&marbles, &world);

        let human = spawn(&mut marbles, &mut world, Some("42"));
        let bot = spawn(&mut marbles, &mut world, None);
        sync.marble_entered(&human);
        sync.marble_entered(&bot);
        sync.marble_finished(1, 5100);

        let snapshots = sync.take_snapshots(&marbles, &world);
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.new_marbles.as_ref().unwrap().len(), 10);
        let entries = snapshot.new_marble_entries();
        assert_eq!(entries[0].user_id.as_deref(), Some("42"));
        assert_eq!(entries[1].user_id, None);
        assert_eq!(snapshot.finished_entries(), vec![(1, 5100)]);
        assert_eq!(snapshot.positions.as_ref().unwrap().len(), 6);
        assert_eq!(snapshot.rotations.as_ref().unwrap().len(), 8);
        assert_eq!(snapshot.server_constants, None);
    }

    #[test]
    fn transforms_sent_every_tick_while_marbles_live() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut marbles = MarbleRegistry::new(0.2, 1.0, area(), far_away());
        let mut sync = SyncBroadcaster::new(20.0, 15.0, "slope");
        sync.take_snapshots(&marbles, &world);
        spawn(&mut marbles, &mut world, None);

        for _ in 0..3 {
            let snapshots = sync.take_snapshots(&marbles, &world);
            assert_eq!(snapshots.len(), 1);
            assert!(snapshots[0].positions.is_some());
            assert!(snapshots[0].new_marbles.is_none());
        }
    }

    #[test]
    fn two_state_changes_in_one_tick_stay_ordered() {
        let world = PhysicsWorld::new(-10.0, 60);
        let marbles = MarbleRegistry::new(0.2, 1.0, area(), far_away());
        let mut sync = SyncBroadcaster::new(20.0, 15.0, "slope");
        sync.take_snapshots(&marbles, &world);

        sync.set_state(GameStateName::Waiting, None);
        sync.set_state(GameStateName::Enter, Some(20_000));
        let snapshots = sync.take_snapshots(&marbles, &world);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].game_state, Some(GameStateName::Waiting));
        assert_eq!(snapshots[1].game_state, Some(GameStateName::Enter));
        assert_eq!(snapshots[1].state_context, Some(20_000));
    }

    #[test]
    fn dropped_deltas_are_not_sent() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut marbles = MarbleRegistry::new(0.2, 1.0, area(), far_away());
        let mut sync = SyncBroadcaster::new(20.0, 15.0, "slope");
        sync.take_snapshots(&marbles, &world);

        let marble = spawn(&mut marbles, &mut world, None);
        sync.marble_entered(&marble);
        marbles.destroy_all_marbles(&mut world);
        sync.drop_marble_deltas();
        sync.set_state(GameStateName::Waiting, None);

        let snapshots = sync.take_snapshots(&marbles, &world);
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].new_marbles.is_none());
        assert!(snapshots[0].positions.is_none());
    }

    #[test]
    fn full_snapshot_lists_every_marble() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut marbles = MarbleRegistry::new(0.2, 1.0, area(), far_away());
        let sync = SyncBroadcaster::new(20.0, 15.0, "slope");
        spawn(&mut marbles, &mut world, Some("1"));
        spawn(&mut marbles, &mut world, Some("2"));
        marbles.get_mut(0).unwrap().time = Some(4200);

        let full = sync.full_snapshot(GameStateName::Started, Some(9000), &marbles, &world);
        assert_eq!(full.server_constants, Some([20.0, 15.0]));
        assert_eq!(full.game_state, Some(GameStateName::Started));
        assert_eq!(full.state_context, Some(9000));
        assert_eq!(full.new_marble_entries().len(), 2);
        assert_eq!(full.finished_entries(), vec![(0, 4200)]);
        assert_eq!(full.positions.unwrap().len(), 6);
    }
}

use super::world::PhysicsWorld;
use crate::level::Aabb;
use rand::Rng;
use rapier3d::prelude::*;

/// Who a marble belongs to and how it looks.
#[derive(Debug, Clone, PartialEq)]
pub struct MarbleMeta {
    /// None for bots
    pub user_id: Option<String>,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone)]
pub struct Marble {
    pub entry_id: usize,
    pub user_id: Option<String>,
    pub name: String,
    pub color: String,
    /// Radius
    pub size: f32,
    pub rank: Option<usize>,
    /// Milliseconds from race start to finish
    pub time: Option<u64>,
    pub finished: bool,
    pub body: RigidBodyHandle,
}

impl Marble {
    pub fn is_bot(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Live marbles of the current round, indexed by entry id.
#[derive(Debug)]
pub struct MarbleRegistry {
    marbles: Vec<Marble>,
    radius: f32,
    density: f32,
    spawn_area: Aabb,
    finish_area: Aabb,
}

impl MarbleRegistry {
    pub fn new(radius: f32, density: f32, spawn_area: Aabb, finish_area: Aabb) -> Self {
        Self {
            marbles: Vec::new(),
            radius,
            density,
            spawn_area,
            finish_area,
        }
    }

    /// Adds a dynamic ball at a random point of the spawn area. Bodies start
    /// asleep and stay put until `activate_all`.
    pub fn create_marble(
        &mut self,
        world: &mut PhysicsWorld,
        meta: MarbleMeta,
        rng: &mut impl Rng,
    ) -> &Marble {
        let area = self.spawn_area;
        let position = vector![
            rng.gen_range(area.min[0]..=area.max[0]),
            rng.gen_range(area.min[1]..=area.max[1]),
            rng.gen_range(area.min[2]..=area.max[2])
        ];

        let body = RigidBodyBuilder::dynamic()
            .translation(position)
            .ccd_enabled(true)
            .sleeping(true)
            .build();
        let collider = ColliderBuilder::ball(self.radius)
            .density(self.density)
            .friction(0.3)
            .restitution(0.2)
            .build();
        let body = world.add_body(body, collider);

        let entry_id = self.marbles.len();
        self.marbles.push(Marble {
            entry_id,
            user_id: meta.user_id,
            name: meta.name,
            color: meta.color,
            size: self.radius,
            rank: None,
            time: None,
            finished: false,
            body,
        });
        &self.marbles[entry_id]
    }

    /// Entry ids of marbles that entered the finish area since the last call.
    /// Each marble is reported at most once.
    pub fn get_finished_marbles(&mut self, world: &PhysicsWorld) -> Vec<usize> {
        let mut finished = Vec::new();
        for marble in self.marbles.iter_mut().filter(|m| !m.finished) {
            let Some(body) = world.body(marble.body) else {
                continue;
            };
            let t = body.translation();
            if self.finish_area.contains([t.x, t.y, t.z]) {
                marble.finished = true;
                finished.push(marble.entry_id);
            }
        }
        finished
    }

    /// Wakes every marble body.
    pub fn activate_all(&self, world: &mut PhysicsWorld) {
        for marble in &self.marbles {
            if let Some(body) = world.body_mut(marble.body) {
                body.wake_up(true);
            }
        }
    }

    /// Removes every marble body from the world and empties the registry.
    pub fn destroy_all_marbles(&mut self, world: &mut PhysicsWorld) {
        for marble in self.marbles.drain(..) {
            world.remove_body(marble.body);
        }
    }

    /// Flat position (xyz) and rotation (xyzw) arrays, indexed by entry id.
    pub fn transforms(&self, world: &PhysicsWorld) -> (Vec<f32>, Vec<f32>) {
        let mut positions = Vec::with_capacity(self.marbles.len() * 3);
        let mut rotations = Vec::with_capacity(self.marbles.len() * 4);
        for marble in &self.marbles {
            match world.body(marble.body) {
                Some(body) => {
                    let t = body.translation();
                    let q = body.rotation().coords;
                    positions.extend([t.x, t.y, t.z]);
                    rotations.extend([q.x, q.y, q.z, q.w]);
                }
                None => {
                    positions.extend([0.0; 3]);
                    rotations.extend([0.0, 0.0, 0.0, 1.0]);
                }
            }
        }
        (positions, rotations)
    }

    pub fn get(&self, entry_id: usize) -> Option<&Marble> {
        self.marbles.get(entry_id)
    }

    pub fn get_mut(&mut self, entry_id: usize) -> Option<&mut Marble> {
        self.marbles.get_mut(entry_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marble> {
        self.marbles.iter()
    }

    pub fn len(&self) -> usize {
        self.marbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marbles.is_empty()
    }
}

use crate::level::{ColliderDef, Functionality, HeightGrid, LevelData, ShapeDef};
use rapier3d::na::{DMatrix, Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Extra drop below the gate's own height when it opens.
const GATE_OPEN_CLEARANCE: f32 = 2.0;

/// Upper bound on fixed sub-steps per `step_to` call.
const MAX_SUBSTEPS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("malformed collider #{index}: {reason}")]
    MalformedCollider { index: usize, reason: String },
    #[error("malformed terrain: {0}")]
    MalformedTerrain(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed,
}

/// Kinematic barrier at the start line.
#[derive(Debug, Clone)]
pub struct Gate {
    pub collider: ColliderDef,
    pub state: GateState,
    pub body: RigidBodyHandle,
}

impl Gate {
    /// Where the gate sits for a given state.
    fn translation_for(&self, state: GateState) -> Vector<Real> {
        let [x, y, z] = self.collider.position;
        let offset = match state {
            GateState::Closed => 0.0,
            GateState::Open => self.collider.shape.height() + GATE_OPEN_CLEARANCE,
        };
        vector![x, y - offset, z]
    }
}

/// Rapier world holding the level geometry and every marble body.
pub struct PhysicsWorld {
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    gravity: Vector<Real>,
    gates: Vec<Gate>,
    last_step: Option<Instant>,
    /// Wall-clock time not yet consumed by a fixed sub-step
    accumulator: Duration,
    frame: u64,
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("frame", &self.frame)
            .field("rigid_body_count", &self.bodies.len())
            .field("gate_count", &self.gates.len())
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    pub fn new(gravity: f32, step_rate_hz: u32) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: 1.0 / step_rate_hz.max(1) as Real,
            ..Default::default()
        };

        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            gravity: vector![0.0, gravity, 0.0],
            gates: Vec::new(),
            last_step: None,
            accumulator: Duration::ZERO,
            frame: 0,
        }
    }

    /// Builds terrain, level colliders and gates for a level.
    pub fn from_level(level: &LevelData, gravity: f32, step_rate_hz: u32) -> Result<Self, PhysicsError> {
        let mut world = Self::new(gravity, step_rate_hz);
        world.add_terrain(&level.terrain)?;
        for (index, collider) in level.colliders.iter().enumerate() {
            match collider.functionality {
                Functionality::StartGate => {
                    world.add_start_gate(index, collider)?;
                }
                Functionality::Static | Functionality::Dynamic => {
                    world.add_primitive_collider(index, collider)?;
                }
            }
        }
        tracing::info!(
            "Physics world built: {} bodies, {} gates",
            world.bodies.len(),
            world.gates.len()
        );
        Ok(world)
    }

    /// Adds the static heightfield. The field is centred on the origin.
    pub fn add_terrain(&mut self, grid: &HeightGrid) -> Result<RigidBodyHandle, PhysicsError> {
        if grid.width < 2 || grid.depth < 2 {
            return Err(PhysicsError::MalformedTerrain(format!(
                "grid must be at least 2x2, got {}x{}",
                grid.width, grid.depth
            )));
        }
        if grid.heights.len() != grid.width * grid.depth {
            return Err(PhysicsError::MalformedTerrain(format!(
                "expected {} height samples, got {}",
                grid.width * grid.depth,
                grid.heights.len()
            )));
        }
        if !grid.grid_distance.is_finite() || grid.grid_distance <= 0.0 {
            return Err(PhysicsError::MalformedTerrain(
                "grid distance must be finite and > 0".to_string(),
            ));
        }
        if grid.heights.iter().any(|h| !h.is_finite()) {
            return Err(PhysicsError::MalformedTerrain(
                "height samples must be finite".to_string(),
            ));
        }

        // Rows run along Z, columns along X
        let heights = DMatrix::from_fn(grid.depth, grid.width, |row, column| {
            grid.height_at(column, row)
        });
        let scale = vector![
            (grid.width - 1) as Real * grid.grid_distance,
            1.0,
            (grid.depth - 1) as Real * grid.grid_distance
        ];

        let body = self.bodies.insert(RigidBodyBuilder::fixed().build());
        let collider = ColliderBuilder::heightfield(heights, scale)
            .friction(0.5)
            .build();
        self.colliders
            .insert_with_parent(collider, body, &mut self.bodies);
        Ok(body)
    }

    /// Adds a level primitive. Static colliders become fixed bodies; dynamic
    /// ones and start gates become kinematic bodies that only move when told.
    pub fn add_primitive_collider(
        &mut self,
        index: usize,
        def: &ColliderDef,
    ) -> Result<RigidBodyHandle, PhysicsError> {
        let malformed = |reason: &str| PhysicsError::MalformedCollider {
            index,
            reason: reason.to_string(),
        };

        let shape = match def.shape {
            ShapeDef::Box {
                width,
                height,
                depth,
            } => {
                if [width, height, depth]
                    .iter()
                    .any(|e| !e.is_finite() || *e <= 0.0)
                {
                    return Err(malformed("box extents must be finite and > 0"));
                }
                ColliderBuilder::cuboid(width * 0.5, height * 0.5, depth * 0.5)
            }
            ShapeDef::Sphere { radius } => {
                if !radius.is_finite() || radius <= 0.0 {
                    return Err(malformed("sphere radius must be finite and > 0"));
                }
                ColliderBuilder::ball(radius)
            }
        };

        if def.position.iter().any(|v| !v.is_finite()) {
            return Err(malformed("position must be finite"));
        }
        let [qx, qy, qz, qw] = def.rotation;
        let quaternion = Quaternion::new(qw, qx, qy, qz);
        if quaternion.coords.iter().any(|v| !v.is_finite()) || quaternion.norm() < 1e-6 {
            return Err(malformed("rotation must be a non-zero quaternion"));
        }
        let [x, y, z] = def.position;
        let position = Isometry::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_quaternion(quaternion),
        );

        let builder = match def.functionality {
            Functionality::Static => RigidBodyBuilder::fixed(),
            Functionality::Dynamic | Functionality::StartGate => {
                RigidBodyBuilder::kinematic_position_based()
            }
        };
        let body = self.bodies.insert(builder.position(position).build());
        self.colliders
            .insert_with_parent(shape.build(), body, &mut self.bodies);
        Ok(body)
    }

    /// Adds a start gate. Gates start closed.
    pub fn add_start_gate(&mut self, index: usize, def: &ColliderDef) -> Result<&Gate, PhysicsError> {
        let body = self.add_primitive_collider(index, def)?;
        self.gates.push(Gate {
            collider: def.clone(),
            state: GateState::Closed,
            body,
        });
        Ok(&self.gates[self.gates.len() - 1])
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Moves every gate to its open or closed position.
    pub fn set_all_gates(&mut self, state: GateState) {
        for gate in &mut self.gates {
            gate.state = state;
            let target = gate.translation_for(state);
            if let Some(body) = self.bodies.get_mut(gate.body) {
                body.set_next_kinematic_translation(target);
                body.wake_up(true);
            }
        }
        tracing::debug!("Gates set to {:?}", state);
    }


    pub fn add_body(&mut self, body: RigidBody, collider: Collider) -> RigidBodyHandle {
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        handle
    }

    /// Removes a body and its colliders.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    /// Advances by the wall-clock time since the previous call, in fixed
    /// sub-steps. The first call only records the clock.
    pub fn step_to(&mut self, now: Instant) -> u32 {
        let elapsed = match self.last_step.replace(now) {
            Some(last) => now.saturating_duration_since(last),
            None => return 0,
        };
        self.step_elapsed(elapsed)
    }

    /// Runs as many fixed sub-steps as `elapsed` (plus carried time) covers,
    /// capped at `MAX_SUBSTEPS`. Time beyond the cap is dropped.
    pub fn step_elapsed(&mut self, elapsed: Duration) -> u32 {
        let dt = Duration::from_secs_f32(self.integration_parameters.dt);
        self.accumulator += elapsed;

        let mut steps = 0;
        while self.accumulator >= dt && steps < MAX_SUBSTEPS {
            self.step();
            self.accumulator -= dt;
            steps += 1;
        }
        if steps == MAX_SUBSTEPS && self.accumulator >= dt {
            tracing::debug!("Physics fell behind, dropping {:?}", self.accumulator);
            self.accumulator = Duration::ZERO;
        }
        steps
    }

    /// One fixed step.
    pub fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
        self.frame += 1;
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_grid() -> HeightGrid {
        HeightGrid {
            width: 3,
            depth: 3,
            grid_distance: 2.0,
            heights: vec![0.0; 9],
        }
    }

    fn gate_def() -> ColliderDef {
        ColliderDef {
            functionality: Functionality::StartGate,
            shape: ShapeDef::Box {
                width: 2.0,
                height: 1.5,
                depth: 0.25,
            },
            position: [0.0, 0.75, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn builtin_level_builds() {
        let world = PhysicsWorld::from_level(&LevelData::builtin(), -10.0, 60).unwrap();
        // Terrain, two walls and the gate
        assert_eq!(world.bodies.len(), 4);
        assert_eq!(world.gates().len(), 1);
        assert_eq!(world.gates()[0].state, GateState::Closed);
    }

    #[test]
    fn terrain_size_mismatch_is_fatal() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut grid = flat_grid();
        grid.heights.pop();
        assert!(matches!(
            world.add_terrain(&grid),
            Err(PhysicsError::MalformedTerrain(_))
        ));
    }

    #[test]
    fn zero_sized_box_is_fatal() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut def = gate_def();
        def.shape = ShapeDef::Box {
            width: 0.0,
            height: 1.0,
            depth: 1.0,
        };
        assert!(matches!(
            world.add_primitive_collider(4, &def),
            Err(PhysicsError::MalformedCollider { index: 4, .. })
        ));
    }

    #[test]
    fn static_collider_is_fixed_and_gate_is_kinematic() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let mut wall = gate_def();
        wall.functionality = Functionality::Static;
        let wall = world.add_primitive_collider(0, &wall).unwrap();
        let gate = world.add_start_gate(1, &gate_def()).unwrap().body;

        assert!(world.body(wall).unwrap().is_fixed());
        assert!(world.body(gate).unwrap().is_kinematic());
    }

    #[test]
    fn opening_gate_drops_it_by_height_plus_clearance() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        world.add_terrain(&flat_grid()).unwrap();
        let gate = world.add_start_gate(0, &gate_def()).unwrap().body;

        world.set_all_gates(GateState::Open);
        world.step();
        let y = world.body(gate).unwrap().translation().y;
        assert!((y - (0.75 - 1.5 - GATE_OPEN_CLEARANCE)).abs() < 1e-4);
        assert_eq!(world.gates()[0].state, GateState::Open);

        world.set_all_gates(GateState::Closed);
        world.step();
        let y = world.body(gate).unwrap().translation().y;
        assert!((y - 0.75).abs() < 1e-4);
    }

    #[test]
    fn gates_ignore_gravity() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let gate = world.add_start_gate(0, &gate_def()).unwrap().body;
        world.step_n_for_test(30);
        let y = world.body(gate).unwrap().translation().y;
        assert!((y - 0.75).abs() < 1e-6);
    }

    #[test]
    fn gates_switch_state_in_place() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let gate = world.add_start_gate(0, &gate_def()).unwrap().body;
        world.set_all_gates(GateState::Open);
        assert_eq!(world.gates()[0].state, GateState::Open);
        world.set_all_gates(GateState::Closed);
        assert_eq!(world.gates()[0].state, GateState::Closed);
        assert_eq!(world.gates()[0].body, gate);
        assert_eq!(world.gates().len(), 1);
    }

    #[test]
    fn ball_falls_onto_terrain() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        world.add_terrain(&flat_grid()).unwrap();
        let ball = world.add_body(
            RigidBodyBuilder::dynamic()
                .translation(vector![0.0, 2.0, 0.0])
                .build(),
            ColliderBuilder::ball(0.2).build(),
        );

        world.step_n_for_test(180);
        let y = world.body(ball).unwrap().translation().y;
        assert!(y < 2.0, "ball should have fallen, y = {}", y);
        assert!(y > 0.0, "ball should rest on the terrain, y = {}", y);
    }

    #[test]
    fn step_elapsed_caps_substeps() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        assert_eq!(world.step_elapsed(Duration::from_secs(5)), MAX_SUBSTEPS);
        assert_eq!(world.current_frame(), MAX_SUBSTEPS as u64);
        // Backlog is dropped rather than replayed
        assert_eq!(world.step_elapsed(Duration::ZERO), 0);
    }

    #[test]
    fn step_elapsed_carries_partial_steps() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        // 10ms is less than one 16.6ms step
        assert_eq!(world.step_elapsed(Duration::from_millis(10)), 0);
        assert_eq!(world.step_elapsed(Duration::from_millis(10)), 1);
    }

    #[test]
    fn first_step_to_only_records_clock() {
        let mut world = PhysicsWorld::new(-10.0, 60);
        let t0 = Instant::now();
        assert_eq!(world.step_to(t0), 0);
        assert_eq!(world.step_to(t0 + Duration::from_millis(60)), 3);
    }

    impl PhysicsWorld {
        fn step_n_for_test(&mut self, n: u32) {
            for _ in 0..n {
                self.step();
            }
        }
    }
}

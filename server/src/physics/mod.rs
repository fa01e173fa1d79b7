//! Rigid-body simulation: the static level (terrain, gates) and the marbles.

pub mod marbles;
pub mod world;

pub use marbles::{Marble, MarbleMeta, MarbleRegistry};
pub use world::{GateState, PhysicsError, PhysicsWorld};

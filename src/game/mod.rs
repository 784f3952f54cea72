//! Game Logic Module
//!
//! The authoritative 3D simulation. Everything here runs in fixed steps and
//! iterates in `EntityId` order, so identical inputs give identical worlds.
//!
//! ## Module Structure
//!
//! - `ecs`: Entity ids, sparse sets, component kinds
//! - `components`: Transform, motion, collider and gameplay components
//! - `input`: Control intents, sequenced snapshots, reorder queue
//! - `motion`: Damped integration and orientation update
//! - `octree`: Spatial index over entity positions
//! - `collision`: Detection and response
//! - `events`: Observer registry for component and contact events
//! - `state`: World state (entities + components + index)
//! - `tick`: One fixed step
//! - `simulation`: Scheduler-driven facade

pub mod collision;
pub mod components;
pub mod ecs;
pub mod events;
pub mod input;
pub mod motion;
pub mod octree;
pub mod simulation;
pub mod state;
pub mod tick;

// Re-export key types
pub use components::{Collider, ColliderShape, CollisionMesh, RigidMotion, Transform};
pub use ecs::{ComponentKind, EntityId};
pub use events::{CollisionEvent, ContactPhase, EventBus, WorldEvent};
pub use input::{ControlIntent, InputQueue, InputSnapshot, InputSource};
pub use simulation::{AdvanceOutcome, Simulation, SimulationError};
pub use state::WorldState;
pub use tick::StepResult;

//! Simulation Facade
//!
//! Ties the world, the fixed-step scheduler and the per-pilot input queues
//! together behind the operations collaborators use:
//! `advance_simulation`, `apply_input`, `query_nearby` and the collision
//! start/stop listeners.

use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use tracing::debug;

use crate::config::SimConfig;
use crate::core::math::Pose;
use crate::core::scheduler::{clamp_frame_delta, FixedStepScheduler};
use crate::game::ecs::EntityId;
use crate::game::events::{CollisionEvent, ObserverId, WorldEvent};
use crate::game::input::{InputAcceptance, InputQueue, InputSnapshot};
use crate::game::state::WorldState;
use crate::game::tick::{step, StepInputs};

/// Errors from the facade.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SimulationError {
    /// Input addressed to an entity that is not piloted.
    #[error("Entity {0} is not piloted")]
    NotPiloted(EntityId),
}

/// What one `advance_simulation` call did.
#[derive(Debug, Default)]
pub struct AdvanceOutcome {
    /// Fixed steps executed.
    pub steps: u32,
    /// Leftover fraction of a step, for render interpolation.
    pub alpha: f64,
    /// Events from every step, in order.
    pub events: Vec<WorldEvent>,
    /// Last sequence applied per pilot during this call.
    pub processed_inputs: BTreeMap<EntityId, u32>,
}

/// Authoritative simulation driven by wall-clock deltas.
#[derive(Debug)]
pub struct Simulation {
    state: WorldState,
    scheduler: FixedStepScheduler,
    config: SimConfig,
    queues: BTreeMap<EntityId, InputQueue>,
}

impl Simulation {
    /// Empty world.
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: WorldState::new(&config),
            scheduler: FixedStepScheduler::new(config.step_ms()),
            config,
            queues: BTreeMap::new(),
        }
    }

    /// World state.
    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// Mutable world state (for spawning scenery and tests).
    pub fn state_mut(&mut self) -> &mut WorldState {
        &mut self.state
    }

    /// Configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Spawn a piloted ship at a seeded random point.
    pub fn spawn_pilot(&mut self) -> EntityId {
        let id = self.state.spawn_ship_random(&self.config.ship);
        self.queues.insert(id, InputQueue::new(self.config.max_pending_inputs));
        id
    }

    /// Spawn a piloted ship at a given pose.
    pub fn spawn_pilot_at(&mut self, position: Vec3, rotation: Quat) -> EntityId {
        let id = self.state.spawn_ship(position, rotation, &self.config.ship);
        self.queues.insert(id, InputQueue::new(self.config.max_pending_inputs));
        id
    }

    /// Remove an entity and discard its input queue.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        self.queues.remove(&id);
        self.state.despawn(id)
    }

    /// Queue an input for the next fixed step.
    pub fn apply_input(&mut self, id: EntityId, input: InputSnapshot) -> Result<InputAcceptance, SimulationError> {
        let queue = self.queues.get_mut(&id).ok_or(SimulationError::NotPiloted(id))?;
        let acceptance = queue.push(input);
        if acceptance != InputAcceptance::Queued {
            debug!(
                entity = %id,
                sequence = input.sequence_number,
                last_processed = queue.last_processed(),
                ?acceptance,
                "input dropped"
            );
        }
        Ok(acceptance)
    }

    /// Highest input sequence applied for `id`, 0 before any.
    pub fn last_processed_input(&self, id: EntityId) -> u32 {
        self.queues.get(&id).map_or(0, InputQueue::last_processed)
    }

    /// Feed a wall-clock delta. Clamps it, then runs zero or more fixed steps.
    pub fn advance_simulation(&mut self, elapsed_ms: f64) -> AdvanceOutcome {
        let elapsed = clamp_frame_delta(elapsed_ms, self.config.max_frame_ms);
        let mut outcome = AdvanceOutcome::default();

        let Self {
            state,
            scheduler,
            config,
            queues,
        } = self;

        let alpha = scheduler.advance(elapsed, |dt_ms| {
            let inputs: StepInputs = queues
                .iter_mut()
                .map(|(id, queue)| (*id, queue.drain_ready()))
                .filter(|(_, drained)| !drained.is_empty())
                .collect();

            let result = step(state, &inputs, dt_ms, config);
            outcome.steps += 1;
            outcome.events.extend(result.events);
            outcome.processed_inputs.extend(result.processed_inputs);
        });

        outcome.alpha = alpha;
        outcome
    }

    /// Leftover fraction of a step since the last advance.
    pub fn alpha(&self) -> f64 {
        self.scheduler.alpha()
    }

    /// Fixed step size in milliseconds.
    pub fn step_ms(&self) -> f64 {
        self.scheduler.step_ms()
    }

    /// Entities near `point`, using the index from the last step.
    pub fn query_nearby(&self, point: Vec3, radius: f32) -> Vec<EntityId> {
        self.state.query_nearby(point, radius)
    }

    /// Listen for contacts starting on `entity`.
    pub fn on_collision_start<F>(&mut self, entity: EntityId, f: F) -> ObserverId
    where
        F: FnMut(&CollisionEvent) + Send + 'static,
    {
        self.state.bus.on_collision_start(entity, f)
    }

    /// Listen for contacts ending on `entity`.
    pub fn on_collision_stop<F>(&mut self, entity: EntityId, f: F) -> ObserverId
    where
        F: FnMut(&CollisionEvent) + Send + 'static,
    {
        self.state.bus.on_collision_stop(entity, f)
    }

    /// Interpolated display pose of an entity.
    pub fn render_pose(&self, id: EntityId) -> Option<Pose> {
        let alpha = self.scheduler.alpha() as f32;
        self.state
            .get::<crate::game::components::Transform>(id)
            .map(|t| t.render_pose(alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::Collider;
    use crate::game::input::ControlIntent;
    use std::sync::{Arc, Mutex};

    fn forward(seq: u32) -> InputSnapshot {
        InputSnapshot::new(ControlIntent::moving(0, 0, 1), seq)
    }

    #[test]
    fn test_advance_runs_fixed_steps() {
        let mut sim = Simulation::new(SimConfig::default());
        let outcome = sim.advance_simulation(50.0);
        assert!(outcome.steps == 2 || outcome.steps == 3);
        assert!((0.0..1.0).contains(&outcome.alpha));
        assert_eq!(sim.state().frame, outcome.steps as u64);
    }

    #[test]
    fn test_stall_is_clamped() {
        let mut sim = Simulation::new(SimConfig::default());
        let outcome = sim.advance_simulation(60_000.0);
        assert!(outcome.steps <= 15);
    }

    #[test]
    fn test_inputs_apply_once_in_order() {
        let mut sim = Simulation::new(SimConfig::default());
        let ship = sim.spawn_pilot_at(Vec3::ZERO, Quat::IDENTITY);

        assert_eq!(sim.apply_input(ship, forward(2)), Ok(InputAcceptance::Queued));
        assert_eq!(sim.apply_input(ship, forward(1)), Ok(InputAcceptance::Queued));
        assert_eq!(sim.apply_input(ship, forward(1)), Ok(InputAcceptance::Duplicate));

        let outcome = sim.advance_simulation(sim.step_ms());
        assert_eq!(outcome.steps, 1);
        assert_eq!(outcome.processed_inputs.get(&ship), Some(&2));
        assert_eq!(sim.last_processed_input(ship), 2);

        assert_eq!(sim.apply_input(ship, forward(2)), Ok(InputAcceptance::Stale));
        assert!(sim.render_pose(ship).is_some());
    }

    #[test]
    fn test_unknown_pilot_rejected() {
        let mut sim = Simulation::new(SimConfig::default());
        let rock = sim
            .state_mut()
            .spawn_body(Vec3::ZERO, Vec3::ZERO, Collider::sphere(1.0), 1.0);
        assert_eq!(
            sim.apply_input(rock, forward(1)),
            Err(SimulationError::NotPiloted(rock))
        );
    }

    #[test]
    fn test_query_nearby_and_listeners() {
        let mut sim = Simulation::new(SimConfig::default());
        let a = sim
            .state_mut()
            .spawn_body(Vec3::new(-1.5, 0.0, 0.0), Vec3::X, Collider::sphere(1.0), 1.0);
        let b = sim
            .state_mut()
            .spawn_body(Vec3::new(1.5, 0.0, 0.0), -Vec3::X, Collider::sphere(1.0), 1.0);

        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        sim.on_collision_start(b, move |ev| sink.lock().unwrap().push(ev.other));

        for _ in 0..60 {
            sim.advance_simulation(sim.step_ms());
        }
        assert_eq!(*hits.lock().unwrap(), vec![a]);

        let nearby = sim.query_nearby(sim.state().pose(a).unwrap().position, 0.0);
        assert_eq!(nearby, vec![a]);
    }

    #[test]
    fn test_sustained_fire_keeps_storage_bounded() {
        let mut sim = Simulation::new(SimConfig::default());
        let ship = sim.spawn_pilot_at(Vec3::ZERO, Quat::IDENTITY);
        let fire = ControlIntent {
            weapon_primary: true,
            ..ControlIntent::default()
        };
        let lifetime = sim.config().projectile.lifetime_steps as usize;
        let cooldown = sim.config().projectile.cooldown_steps.max(1) as usize;
        let max_live = 1 + lifetime / cooldown + 1;

        let mut shots = 0;
        let mut pages_after_warmup = 0;
        for seq in 1..=6600u32 {
            sim.apply_input(ship, InputSnapshot::new(fire, seq)).unwrap();
            let outcome = sim.advance_simulation(sim.step_ms());
            shots += outcome
                .events
                .iter()
                .filter(|ev| matches!(ev, WorldEvent::ProjectileFired { .. }))
                .count();

            assert!(sim.state().entity_count() <= max_live);
            if seq == 600 {
                pages_after_warmup = sim.state().sparse_pages();
            }
        }

        assert!(shots > 600);
        assert!(sim.state().entity_count() <= max_live);
        // Pages follow the live ids, not the thousands allocated so far.
        assert!(sim.state().sparse_pages() <= pages_after_warmup.max(3 * 7));
    }

    #[test]
    fn test_remove_entity_discards_queue() {
        let mut sim = Simulation::new(SimConfig::default());
        let ship = sim.spawn_pilot();
        sim.apply_input(ship, forward(1)).unwrap();
        assert!(sim.remove_entity(ship));
        assert!(sim.apply_input(ship, forward(2)).is_err());
        assert_eq!(sim.last_processed_input(ship), 0);
    }
}

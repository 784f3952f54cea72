//! Authoritative Fixed Step
//!
//! One call to [`step`] advances the world by exactly one fixed step. Given
//! the same starting world and the same inputs it produces the same world,
//! bit for bit.

use std::collections::BTreeMap;

use glam::Vec3;
use tracing::debug;

use crate::config::SimConfig;
use crate::core::math::LOCAL_FORWARD;
use crate::game::collision::{resolve_collisions, Contact};
use crate::game::components::{
    Collider, Contacts, Lifetime, Owner, Pilot, RigidMotion, Transform,
};
use crate::game::ecs::EntityId;
use crate::game::events::{CollisionEvent, ContactPhase, WorldEvent};
use crate::game::input::InputSnapshot;
use crate::game::motion::{apply_input, contain};
use crate::game::state::WorldState;

/// Inputs for one step, keyed by piloted entity, each list in sequence order.
pub type StepInputs = BTreeMap<EntityId, Vec<InputSnapshot>>;

/// Result of a step.
#[derive(Debug, Default)]
pub struct StepResult {
    /// Frame index after the step.
    pub frame: u64,
    /// Events generated this step.
    pub events: Vec<WorldEvent>,
    /// Contacts resolved this step.
    pub contacts: Vec<Contact>,
    /// Last sequence applied per pilot that had input this step.
    pub processed_inputs: BTreeMap<EntityId, u32>,
}

impl StepResult {
    /// Collision events only.
    pub fn collisions(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.events.iter().filter_map(WorldEvent::as_collision)
    }
}

/// Run one fixed step of `dt_ms`.
///
/// A piloted entity with no input this step is held in place; each queued
/// input drives exactly one integration of `dt_ms`.
pub fn step(state: &mut WorldState, inputs: &StepInputs, dt_ms: f64, config: &SimConfig) -> StepResult {
    let dt = dt_ms as f32;
    let mut result = StepResult::default();

    // 0. Advance frame counter
    state.frame += 1;
    let frame = state.frame;

    // 1. Capture previous poses
    for id in state.entities_with::<Transform>() {
        if let Some(t) = state.get_mut::<Transform>(id) {
            t.snapshot_previous();
        }
    }

    // 2. Piloted entities
    apply_pilot_inputs(state, inputs, dt, config, &mut result);

    // 3. Everything else that moves
    let bounds = state.bounds();
    for id in state.entities_with2::<Transform, RigidMotion>() {
        if state.has::<Pilot>(id) {
            continue;
        }
        let (Some(mut t), Some(mut m)) = (
            state.get::<Transform>(id).copied(),
            state.get::<RigidMotion>(id).copied(),
        ) else {
            continue;
        };
        apply_input(&mut t, &mut m, None, dt, config.rest_epsilon);
        contain(&mut t, &mut m, &bounds);
        write_body(state, id, t, m);
    }

    // 4. Lifetimes
    for id in state.entities_with::<Lifetime>() {
        let expired = match state.get_mut::<Lifetime>(id) {
            Some(life) => {
                life.remaining_steps = life.remaining_steps.saturating_sub(1);
                life.remaining_steps == 0
            }
            None => false,
        };
        if expired && state.despawn(id) {
            result.events.push(WorldEvent::Expired { entity: id, frame });
        }
    }

    // 5. Rebuild broad phase, resolve contacts
    let index = state.build_index(config);
    result.contacts = resolve_collisions(state, &index, config);
    state.set_index(index);

    // 6. Contact records
    let mut collisions = Vec::new();
    for contact in &result.contacts {
        touch(state, contact.a, contact.b, frame, &mut collisions);
        if contact.is_mutual() {
            touch(state, contact.b, contact.a, frame, &mut collisions);
        }
    }
    for id in state.entities_with::<Contacts>() {
        let Some(record) = state.get_mut::<Contacts>(id) else {
            continue;
        };
        let stale: Vec<EntityId> = record
            .colliding
            .iter()
            .filter(|(_, last_seen)| **last_seen < frame)
            .map(|(other, _)| *other)
            .collect();
        for other in stale {
            record.colliding.remove(&other);
            collisions.push(CollisionEvent {
                phase: ContactPhase::Stopped,
                entity: id,
                other,
                frame,
            });
        }
    }

    // 7. Notify listeners
    for event in &collisions {
        state.bus.emit_collision(event);
    }
    result.events.extend(collisions.into_iter().map(WorldEvent::Collision));

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        frame,
        contacts = result.contacts.len(),
        events = result.events.len(),
        "step complete"
    );

    result.frame = frame;
    result
}

fn apply_pilot_inputs(
    state: &mut WorldState,
    inputs: &StepInputs,
    dt: f32,
    config: &SimConfig,
    result: &mut StepResult,
) {
    for id in state.entities_with::<Pilot>() {
        let ready = match state.get_mut::<Pilot>(id) {
            Some(pilot) => {
                pilot.cooldown = pilot.cooldown.saturating_sub(1);
                pilot.cooldown == 0
            }
            None => continue,
        };

        let Some(queued) = inputs.get(&id).filter(|q| !q.is_empty()) else {
            continue;
        };
        let (Some(mut t), Some(mut m)) = (
            state.get::<Transform>(id).copied(),
            state.get::<RigidMotion>(id).copied(),
        ) else {
            continue;
        };

        let bounds = state.bounds();
        let mut fire = false;
        for input in queued {
            apply_input(&mut t, &mut m, Some(&input.intent), dt, config.rest_epsilon);
            contain(&mut t, &mut m, &bounds);
            fire |= input.intent.weapon_primary;
        }
        write_body(state, id, t, m);

        let last = queued.last().copied();
        if let Some(pilot) = state.get_mut::<Pilot>(id) {
            pilot.last_input = last;
            if fire && ready {
                pilot.cooldown = config.projectile.cooldown_steps;
            }
        }
        if let Some(last) = last {
            result.processed_inputs.insert(id, last.sequence_number);
        }

        if fire && ready {
            let projectile = fire_projectile(state, id, config);
            result.events.push(WorldEvent::ProjectileFired {
                projectile,
                owner: id,
                frame: state.frame,
            });
        }
    }
}

/// Spawn a projectile ahead of `owner`, inheriting its velocity.
pub fn fire_projectile(state: &mut WorldState, owner: EntityId, config: &SimConfig) -> EntityId {
    let tuning = &config.projectile;
    let (origin, rotation) = state
        .get::<Transform>(owner)
        .map(|t| (t.position, t.rotation))
        .unwrap_or_default();
    let base_velocity = state
        .get::<RigidMotion>(owner)
        .map_or(Vec3::ZERO, |m| m.velocity);
    let owner_radius = state
        .get::<Collider>(owner)
        .map_or(0.0, Collider::bounding_radius);

    let forward = rotation * LOCAL_FORWARD;
    let position = origin + forward * (owner_radius + tuning.radius);

    let id = state.spawn();
    state.insert(id, Transform::at(position, rotation));
    state.insert(id, RigidMotion::drifting(base_velocity + forward * tuning.speed, 1.0));
    state.insert(id, Collider::sphere(tuning.radius).with_raycast());
    state.insert(id, Owner(owner));
    state.insert(id, Contacts::default());
    state.insert(
        id,
        Lifetime {
            remaining_steps: tuning.lifetime_steps.max(1),
        },
    );
    debug!(projectile = %id, owner = %owner, frame = state.frame, "projectile fired");
    id
}

fn write_body(state: &mut WorldState, id: EntityId, t: Transform, m: RigidMotion) {
    if let Some(slot) = state.get_mut::<Transform>(id) {
        *slot = t;
    }
    if let Some(slot) = state.get_mut::<RigidMotion>(id) {
        *slot = m;
    }
}

fn touch(state: &mut WorldState, entity: EntityId, other: EntityId, frame: u64, out: &mut Vec<CollisionEvent>) {
    if !state.has::<Contacts>(entity) {
        state.insert(entity, Contacts::default());
    }
    let Some(record) = state.get_mut::<Contacts>(entity) else {
        return;
    };
    if record.colliding.insert(other, frame).is_none() {
        out.push(CollisionEvent {
            phase: ContactPhase::Started,
            entity,
            other,
            frame,
        });
    }
}

/// Run `log.len()` steps, one per entry.
pub fn replay(state: &mut WorldState, log: &[StepInputs], dt_ms: f64, config: &SimConfig) -> Vec<WorldEvent> {
    let mut events = Vec::new();
    for inputs in log {
        events.extend(step(state, inputs, dt_ms, config).events);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::ControlIntent;
    use glam::Quat;
    use std::sync::{Arc, Mutex};

    const DT: f64 = 1000.0 / 60.0;

    fn no_inputs() -> StepInputs {
        StepInputs::new()
    }

    fn two_spheres(world: &mut WorldState) -> (EntityId, EntityId) {
        let a = world.spawn_body(Vec3::new(-1.5, 0.0, 0.0), Vec3::X, Collider::sphere(1.0), 1.0);
        let b = world.spawn_body(Vec3::new(1.5, 0.0, 0.0), -Vec3::X, Collider::sphere(1.0), 1.0);
        (a, b)
    }

    #[test]
    fn test_head_on_spheres_bounce_apart() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let (a, b) = two_spheres(&mut world);

        let mut bounced_at = None;
        for _ in 0..60 {
            let result = step(&mut world, &no_inputs(), DT, &config);
            if bounced_at.is_none() && !result.contacts.is_empty() {
                bounced_at = Some(result.frame);
            }
        }
        assert!(bounced_at.is_some());

        let va = world.get::<RigidMotion>(a).unwrap().velocity;
        let vb = world.get::<RigidMotion>(b).unwrap().velocity;
        assert!((va.x + 1.0).abs() < 1e-4);
        assert!((vb.x - 1.0).abs() < 1e-4);

        let before = world.pose(a).unwrap().position.distance(world.pose(b).unwrap().position);
        step(&mut world, &no_inputs(), DT, &config);
        let after = world.pose(a).unwrap().position.distance(world.pose(b).unwrap().position);
        assert!(after > before);
    }

    #[test]
    fn test_contact_start_and_stop_are_symmetric() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let (a, b) = two_spheres(&mut world);

        let mut started = Vec::new();
        let mut stopped = Vec::new();
        for _ in 0..60 {
            for ev in step(&mut world, &no_inputs(), DT, &config).collisions() {
                match ev.phase {
                    ContactPhase::Started => started.push((ev.entity, ev.other, ev.frame)),
                    ContactPhase::Stopped => stopped.push((ev.entity, ev.other, ev.frame)),
                }
            }
        }

        assert_eq!(started.len(), 2);
        assert_eq!(started[0].2, started[1].2);
        assert!(started.iter().any(|(e, o, _)| *e == a && *o == b));
        assert!(started.iter().any(|(e, o, _)| *e == b && *o == a));

        assert_eq!(stopped.len(), 2);
        assert!(stopped[0].2 > started[0].2);
        assert!(!world.get::<Contacts>(a).unwrap().is_colliding_with(b));
    }

    #[test]
    fn test_collision_listeners_fire() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let (a, _) = two_spheres(&mut world);

        let log = Arc::new(Mutex::new(Vec::new()));
        let starts = log.clone();
        let stops = log.clone();
        world.bus.on_collision_start(a, move |ev| starts.lock().unwrap().push(ev.phase));
        world.bus.on_collision_stop(a, move |ev| stops.lock().unwrap().push(ev.phase));

        for _ in 0..60 {
            step(&mut world, &no_inputs(), DT, &config);
        }
        assert_eq!(*log.lock().unwrap(), vec![ContactPhase::Started, ContactPhase::Stopped]);
    }

    #[test]
    fn test_trigger_reports_events_without_bounce() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let a = world.spawn_body(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(6.0, 0.0, 0.0), Collider::sphere(1.0), 1.0);
        world.spawn_body(Vec3::ZERO, Vec3::ZERO, Collider::sphere(1.0).as_trigger(), 1.0);

        let mut phases = Vec::new();
        for _ in 0..90 {
            for ev in step(&mut world, &no_inputs(), DT, &config).collisions() {
                if ev.entity == a {
                    phases.push(ev.phase);
                }
            }
        }
        assert_eq!(phases, vec![ContactPhase::Started, ContactPhase::Stopped]);
        assert!((world.get::<RigidMotion>(a).unwrap().velocity.x - 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_pilot_held_without_input() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let ship = world.spawn_ship(Vec3::ZERO, Quat::IDENTITY, &config.ship);

        let mut inputs = StepInputs::new();
        inputs.insert(ship, vec![InputSnapshot::new(ControlIntent::moving(0, 0, 1), 1)]);
        let result = step(&mut world, &inputs, DT, &config);
        assert_eq!(result.processed_inputs.get(&ship), Some(&1));
        assert_eq!(world.get::<Pilot>(ship).unwrap().last_processed(), 1);

        step(&mut world, &inputs, DT, &config);
        let moving = world.pose(ship).unwrap().position;
        assert!(moving.z < 0.0);

        step(&mut world, &no_inputs(), DT, &config);
        assert_eq!(world.pose(ship).unwrap().position, moving);
    }

    #[test]
    fn test_projectile_ignores_owner_and_expires() {
        let mut config = SimConfig::default();
        config.projectile.lifetime_steps = 5;
        let mut world = WorldState::new(&config);
        let ship = world.spawn_ship(Vec3::ZERO, Quat::IDENTITY, &config.ship);

        let fire = ControlIntent {
            weapon_primary: true,
            ..ControlIntent::default()
        };
        let mut inputs = StepInputs::new();
        inputs.insert(ship, vec![InputSnapshot::new(fire, 1)]);
        let result = step(&mut world, &inputs, DT, &config);

        let projectile = result
            .events
            .iter()
            .find_map(|ev| match ev {
                WorldEvent::ProjectileFired { projectile, owner, .. } if *owner == ship => Some(*projectile),
                _ => None,
            })
            .unwrap();
        assert_eq!(world.get::<Owner>(projectile), Some(&Owner(ship)));
        assert!(result.contacts.is_empty());

        let mut expired = false;
        for _ in 0..10 {
            let result = step(&mut world, &no_inputs(), DT, &config);
            assert!(result.contacts.is_empty());
            expired |= result
                .events
                .iter()
                .any(|ev| matches!(ev, WorldEvent::Expired { entity, .. } if *entity == projectile));
        }
        assert!(expired);
        assert!(!world.is_alive(projectile));
    }

    #[test]
    fn test_weapon_cooldown() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let ship = world.spawn_ship(Vec3::ZERO, Quat::IDENTITY, &config.ship);
        let fire = ControlIntent {
            weapon_primary: true,
            ..ControlIntent::default()
        };

        let mut shots = 0;
        for seq in 1..=5 {
            let mut inputs = StepInputs::new();
            inputs.insert(ship, vec![InputSnapshot::new(fire, seq)]);
            let result = step(&mut world, &inputs, DT, &config);
            shots += result
                .events
                .iter()
                .filter(|ev| matches!(ev, WorldEvent::ProjectileFired { .. }))
                .count();
        }
        assert_eq!(shots, 1);
    }

    #[test]
    fn test_bodies_stay_inside_world() {
        let mut config = SimConfig::default();
        config.world_half_extent = 20.0;
        let mut world = WorldState::new(&config);
        let rock = world.spawn_body(Vec3::new(15.0, 0.0, 0.0), Vec3::new(300.0, 0.0, 0.0), Collider::sphere(1.0), 1.0);
        let ship = world.spawn_ship(Vec3::new(0.0, 0.0, -15.0), Quat::IDENTITY, &config.ship);

        for seq in 1..=240 {
            let mut inputs = StepInputs::new();
            let boost = ControlIntent {
                boost: true,
                ..ControlIntent::moving(0, 0, 1)
            };
            inputs.insert(ship, vec![InputSnapshot::new(boost, seq)]);
            step(&mut world, &inputs, DT, &config);

            for id in [rock, ship] {
                let p = world.pose(id).unwrap().position;
                assert!(world.bounds().contains(p), "{} escaped to {}", id, p);
            }
            assert_eq!(world.index().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let config = SimConfig::default();
        let build = || {
            let mut world = WorldState::new(&config);
            let ship = world.spawn_ship(Vec3::ZERO, Quat::IDENTITY, &config.ship);
            two_spheres(&mut world);
            (world, ship)
        };
        let (mut first, ship) = build();
        let (mut second, _) = build();

        let log: Vec<StepInputs> = (1..=120u32)
            .map(|seq| {
                let intent = ControlIntent {
                    movement: [(seq % 3) as i8 - 1, 0, 1],
                    yaw: 0.25,
                    roll: 0.5,
                    weapon_primary: seq % 20 == 0,
                    ..ControlIntent::default()
                };
                let mut inputs = StepInputs::new();
                inputs.insert(ship, vec![InputSnapshot::new(intent, seq)]);
                inputs
            })
            .collect();

        let events_a = replay(&mut first, &log, DT, &config);
        let events_b = replay(&mut second, &log, DT, &config);

        assert_eq!(events_a, events_b);
        assert_eq!(first.compute_hash(), second.compute_hash());
        assert_eq!(first.frame, 120);
    }
}

//! World Session
//!
//! Binds connections to the authoritative simulation. Each connection owns
//! one piloted entity, an outbound channel and the set of entities it can
//! currently see. Snapshots go out on a throttled cadence and are diffed
//! against the previous visible set to produce spawn/despawn messages.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
#[cfg(feature = "debug-tracing")]
use crate::core::hash::short_hex;
use crate::game::components::{RigidMotion, Transform};
use crate::game::ecs::EntityId;
use crate::game::input::InputAcceptance;
use crate::game::simulation::{AdvanceOutcome, Simulation, SimulationError};
use crate::network::protocol::{
    ClientMessage, EntityUpdate, ErrorCode, Hello, InputMessage, ServerMessage, Snapshot, Welcome,
};

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// Session errors.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    /// No such connection.
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Connection limit reached.
    #[error("Session is full")]
    SessionFull,

    /// Simulation rejected the request.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
}

/// A connected client.
#[derive(Debug)]
struct Connection {
    entity: EntityId,
    sender: mpsc::Sender<ServerMessage>,
    visible: BTreeSet<EntityId>,
    connected_at: Instant,
    last_activity: Instant,
}

/// The shared world plus every connection attached to it.
#[derive(Debug)]
pub struct WorldSession {
    simulation: Simulation,
    connections: BTreeMap<ConnectionId, Connection>,
    max_connections: usize,
    version: String,
    steps_since_snapshot: u32,
}

impl WorldSession {
    /// Create a session with an empty world.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            simulation: Simulation::new(config.sim.clone()),
            connections: BTreeMap::new(),
            max_connections: config.max_connections,
            version: config.version.clone(),
            steps_since_snapshot: 0,
        }
    }

    /// The simulation.
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Mutable simulation (scenery, tests).
    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections that have sent nothing for `timeout`.
    pub fn idle_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        self.connections
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Entity piloted by a connection.
    pub fn entity_of(&self, id: &ConnectionId) -> Option<EntityId> {
        self.connections.get(id).map(|c| c.entity)
    }

    /// Attach a connection: spawn its ship and send the welcome.
    pub fn connect(
        &mut self,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(ConnectionId, EntityId), SessionError> {
        if self.connections.len() >= self.max_connections {
            return Err(SessionError::SessionFull);
        }

        let id = Uuid::new_v4();
        let entity = self.simulation.spawn_pilot();
        let now = Instant::now();
        self.connections.insert(
            id,
            Connection {
                entity,
                sender,
                visible: BTreeSet::new(),
                connected_at: now,
                last_activity: now,
            },
        );

        let config = self.simulation.config();
        let welcome = ServerMessage::Welcome(Welcome {
            id: entity.raw(),
            step_ms: config.step_ms(),
            server_update_hz: config.server_update_hz(),
            server_version: self.version.clone(),
        });
        self.notify(&id, welcome);

        info!(connection = %id, entity = %entity, "connection joined");
        Ok((id, entity))
    }

    /// Detach a connection and remove its entity.
    ///
    /// Other connections see the despawn at the next snapshot.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(id) else {
            return false;
        };
        self.simulation.remove_entity(conn.entity);
        info!(
            connection = %id,
            entity = %conn.entity,
            secs = conn.connected_at.elapsed().as_secs(),
            "connection left"
        );
        true
    }

    /// Handle one decoded client message.
    pub fn receive(&mut self, id: &ConnectionId, msg: ClientMessage) -> Result<(), SessionError> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or(SessionError::UnknownConnection(*id))?;
        conn.last_activity = Instant::now();

        match msg {
            ClientMessage::Hello(hello) => self.handle_hello(id, hello),
            ClientMessage::Input(input) => {
                self.receive_input(id, &input)?;
            }
            ClientMessage::Ping { timestamp } => {
                let tick = self.simulation.state().frame;
                self.notify(id, ServerMessage::Pong { timestamp, tick });
            }
            ClientMessage::Leave => {
                self.disconnect(id);
            }
        }
        Ok(())
    }

    fn handle_hello(&self, id: &ConnectionId, hello: Hello) {
        let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
        if major(&hello.client_version) != major(&self.version) {
            warn!(
                connection = %id,
                client = %hello.client_version,
                server = %self.version,
                "version mismatch"
            );
            let msg = format!("Server runs {}", self.version);
            self.notify(id, ServerMessage::error(ErrorCode::VersionMismatch, msg));
        }
    }

    /// Queue an input for the connection's entity.
    pub fn receive_input(
        &mut self,
        id: &ConnectionId,
        input: &InputMessage,
    ) -> Result<InputAcceptance, SessionError> {
        let entity = self
            .entity_of(id)
            .ok_or(SessionError::UnknownConnection(*id))?;
        let acceptance = self.simulation.apply_input(entity, input.to_snapshot())?;
        if acceptance == InputAcceptance::Overflow {
            self.notify(
                id,
                ServerMessage::error(ErrorCode::InvalidInput, "Input backlog full"),
            );
        }
        Ok(acceptance)
    }

    /// Advance the world and send snapshots when due.
    pub fn advance(&mut self, elapsed_ms: f64) -> AdvanceOutcome {
        let outcome = self.simulation.advance_simulation(elapsed_ms);
        if outcome.steps == 0 {
            return outcome;
        }

        self.steps_since_snapshot += outcome.steps;
        let every = self.simulation.config().snapshot_every_steps.max(1);
        if self.steps_since_snapshot >= every {
            self.steps_since_snapshot = 0;
            self.broadcast_snapshots();
        }
        outcome
    }

    /// Send every connection its visibility diff and snapshot.
    pub fn broadcast_snapshots(&mut self) {
        let state = self.simulation.state();
        let tick = state.frame;
        let hash = state.compute_hash();
        let state_hash = hex::encode(hash);

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(tick, hash = %short_hex(&hash), "snapshot");

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            let entity = conn.entity;
            let visible = self.visible_from(entity);

            let mut outbound = Vec::new();
            for gone in conn.visible.difference(&visible) {
                outbound.push(ServerMessage::Despawn { id: gone.raw() });
            }

            let mut entities = Vec::with_capacity(visible.len());
            for other in &visible {
                let Some(update) = self.entity_update(*other, *other == entity) else {
                    continue;
                };
                if !conn.visible.contains(other) {
                    outbound.push(ServerMessage::Spawn(update));
                }
                entities.push(update);
            }
            outbound.push(ServerMessage::Snapshot(Snapshot {
                tick,
                entities,
                state_hash: state_hash.clone(),
            }));

            for msg in outbound {
                self.notify(&id, msg);
            }
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.visible = visible;
            }
        }
    }

    /// Tell every connection the server is going away.
    pub fn shutdown(&mut self, reason: &str) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.notify(
                &id,
                ServerMessage::Shutdown {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Entities within the visibility radius of `viewer`, plus `viewer` itself.
    fn visible_from(&self, viewer: EntityId) -> BTreeSet<EntityId> {
        let state = self.simulation.state();
        let mut visible = BTreeSet::new();
        let Some(origin) = state.pose(viewer).map(|p| p.position) else {
            return visible;
        };
        visible.insert(viewer);

        let radius = self.simulation.config().visibility_radius;
        // The index is from the last step; recheck against current positions.
        for id in state.query_nearby(origin, radius) {
            let in_range = state
                .pose(id)
                .is_some_and(|p| p.position.distance(origin) <= radius);
            if in_range && state.is_alive(id) {
                visible.insert(id);
            }
        }
        visible
    }

    fn entity_update(&self, id: EntityId, own: bool) -> Option<EntityUpdate> {
        let state = self.simulation.state();
        let transform = state.get::<Transform>(id)?;
        let mut update = EntityUpdate::pose_only(id.raw(), transform.pose());
        if own {
            let motion = state.get::<RigidMotion>(id).copied().unwrap_or_default();
            update.last_processed_input = Some(self.simulation.last_processed_input(id));
            update.velocity = Some(motion.velocity.into());
            update.angular_velocity = Some(motion.angular_velocity.into());
        }
        Some(update)
    }

    /// Queue a message without blocking the simulation.
    pub fn notify(&self, id: &ConnectionId, msg: ServerMessage) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        match conn.sender.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %id, "outbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %id, "outbound channel closed");
            }
        }
    }
}

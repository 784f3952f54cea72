//! Client Session
//!
//! The client's single update loop: fixed-step input capture and prediction
//! on its own scheduler, reconciliation on snapshots, and interpolation
//! buffers for every remote entity.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::client::interpolation::RemoteStateBuffer;
use crate::client::prediction::{AuthoritativeState, LocalBody, Predictor};
use crate::config::SimConfig;
use crate::core::math::Pose;
use crate::core::scheduler::{clamp_frame_delta, FixedStepScheduler};
use crate::game::input::InputSource;
use crate::network::protocol::{ClientMessage, EntityUpdate, Hello, InputMessage, ServerMessage};

/// Interval between pings (ms).
pub const PING_INTERVAL_MS: f64 = 1000.0;

/// Client-side view of the world.
#[derive(Debug)]
pub struct ClientSession {
    config: SimConfig,
    scheduler: FixedStepScheduler,
    predictor: Predictor,
    remotes: BTreeMap<u32, RemoteStateBuffer>,
    local_id: Option<u32>,
    server_update_hz: u32,
    last_tick: u64,
    last_state_hash: Option<String>,
    rtt_ms: Option<f64>,
    last_ping_ms: f64,
}

impl ClientSession {
    /// Session that is not yet welcomed.
    pub fn new(config: SimConfig) -> Self {
        Self {
            scheduler: FixedStepScheduler::new(config.step_ms()),
            predictor: Predictor::new(&config),
            remotes: BTreeMap::new(),
            local_id: None,
            server_update_hz: config.server_update_hz(),
            last_tick: 0,
            last_state_hash: None,
            rtt_ms: None,
            last_ping_ms: 0.0,
            config,
        }
    }

    /// Handshake message to send after connecting.
    pub fn hello(&self) -> ClientMessage {
        ClientMessage::Hello(Hello {
            client_version: crate::VERSION.to_string(),
        })
    }

    /// Ping stamped with the local clock.
    pub fn ping(&self, now_ms: f64) -> ClientMessage {
        ClientMessage::Ping {
            timestamp: now_ms.max(0.0) as u64,
        }
    }

    /// Whether the server has assigned an entity.
    pub fn is_connected(&self) -> bool {
        self.local_id.is_some()
    }

    /// Own entity id.
    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    /// The predicted local body.
    pub fn local_body(&self) -> Option<&LocalBody> {
        self.predictor.body()
    }

    /// Inputs not yet acknowledged.
    pub fn pending_inputs(&self) -> usize {
        self.predictor.pending_len()
    }

    /// Last snapshot tick.
    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    /// State hash carried by the last snapshot.
    pub fn last_state_hash(&self) -> Option<&str> {
        self.last_state_hash.as_deref()
    }

    /// Round-trip time from the last pong.
    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt_ms
    }

    /// Remote entities currently buffered.
    pub fn remote_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.remotes.keys().copied()
    }

    /// Apply a message from the server.
    pub fn handle_message(&mut self, msg: ServerMessage, now_ms: f64) {
        match msg {
            ServerMessage::Welcome(welcome) => {
                info!(
                    id = welcome.id,
                    step_ms = welcome.step_ms,
                    server_version = %welcome.server_version,
                    "welcomed"
                );
                self.local_id = Some(welcome.id);
                self.last_ping_ms = now_ms;
                self.server_update_hz = welcome.server_update_hz.max(1);
                if welcome.step_ms > 0.0 {
                    self.scheduler = FixedStepScheduler::new(welcome.step_ms);
                    self.predictor.set_step_ms(welcome.step_ms as f32);
                }
            }
            ServerMessage::Spawn(update) => self.spawn(&update, now_ms),
            ServerMessage::Despawn { id } => {
                if Some(id) == self.local_id {
                    debug!(id, "local entity despawned");
                    self.predictor.detach();
                } else {
                    self.remotes.remove(&id);
                }
            }
            ServerMessage::Snapshot(snapshot) => {
                self.last_tick = snapshot.tick;
                self.last_state_hash = Some(snapshot.state_hash);
                for update in &snapshot.entities {
                    if Some(update.id) == self.local_id {
                        self.reconcile(update);
                    } else {
                        self.remotes
                            .entry(update.id)
                            .or_default()
                            .push(now_ms, update.pose());
                    }
                }
            }
            ServerMessage::Pong { timestamp, .. } => {
                self.rtt_ms = Some((now_ms - timestamp as f64).max(0.0));
            }
            ServerMessage::Error(err) => {
                warn!(code = ?err.code, message = %err.message, "server error");
            }
            ServerMessage::Shutdown { reason } => {
                info!(%reason, "server shutting down");
                self.disconnect();
            }
        }
    }

    fn spawn(&mut self, update: &EntityUpdate, now_ms: f64) {
        if Some(update.id) == self.local_id {
            if !self.predictor.is_alive() {
                let pose = update.pose();
                self.predictor
                    .attach(LocalBody::ship(pose.position, pose.rotation, &self.config.ship));
            }
        } else {
            let mut buffer = RemoteStateBuffer::new();
            buffer.push(now_ms, update.pose());
            self.remotes.insert(update.id, buffer);
        }
    }

    fn reconcile(&mut self, update: &EntityUpdate) {
        let Some(last_processed_input) = update.last_processed_input else {
            return;
        };
        if !self.predictor.is_alive() {
            self.spawn(update, 0.0);
        }
        let pose = update.pose();
        self.predictor.reconcile(&AuthoritativeState {
            last_processed_input,
            position: pose.position,
            rotation: pose.rotation,
            velocity: update.velocity.map(Into::into).unwrap_or_default(),
            angular_velocity: update.angular_velocity.map(Into::into).unwrap_or_default(),
        });
    }

    /// Run one render frame.
    ///
    /// Advances the local scheduler; every fixed step samples `input`,
    /// predicts it and yields the message to send. Steps taken while the
    /// pending queue is full hold the body and send nothing. A ping is added
    /// once per [`PING_INTERVAL_MS`].
    pub fn frame<S>(&mut self, elapsed_ms: f64, now_ms: f64, input: &mut S) -> Vec<ClientMessage>
    where
        S: InputSource + ?Sized,
    {
        let mut outgoing = Vec::new();
        if self.local_id.is_none() {
            return outgoing;
        }

        let elapsed = clamp_frame_delta(elapsed_ms, self.config.max_frame_ms);
        let predictor = &mut self.predictor;
        self.scheduler.advance(elapsed, |_| {
            if let Some(snapshot) = predictor.capture_and_predict(input.current_input()) {
                outgoing.push(ClientMessage::Input(InputMessage::from(&snapshot)));
            }
        });

        if now_ms - self.last_ping_ms >= PING_INTERVAL_MS {
            self.last_ping_ms = now_ms;
            outgoing.push(self.ping(now_ms));
        }
        outgoing
    }

    /// Display pose of the local entity for this frame.
    pub fn local_render_pose(&self) -> Option<Pose> {
        self.predictor.render_pose(self.scheduler.alpha() as f32)
    }

    /// Render time for remote entities: one snapshot interval in the past.
    pub fn remote_render_time(&self, now_ms: f64) -> f64 {
        now_ms - 1000.0 / self.server_update_hz.max(1) as f64
    }

    /// Display pose of a remote entity.
    pub fn remote_render_pose(&mut self, id: u32, now_ms: f64) -> Option<Pose> {
        let render_time = self.remote_render_time(now_ms);
        self.remotes.get_mut(&id)?.sample(render_time)
    }

    /// Display poses of every remote entity, ascending by id.
    pub fn remote_render_poses(&mut self, now_ms: f64) -> Vec<(u32, Pose)> {
        let render_time = self.remote_render_time(now_ms);
        self.remotes
            .iter_mut()
            .filter_map(|(id, buffer)| buffer.sample(render_time).map(|pose| (*id, pose)))
            .collect()
    }

    /// Forget the server: local body, pending inputs and remote buffers.
    pub fn disconnect(&mut self) {
        self.predictor.detach();
        self.remotes.clear();
        self.local_id = None;
        self.last_state_hash = None;
        self.scheduler.reset();
    }
}

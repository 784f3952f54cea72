//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON text frames. Input messages may also
//! be sent as bincode binary frames, the one flat struct on the hot path.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::math::Pose;
use crate::game::input::{ControlIntent, InputSnapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Version handshake.
    Hello(Hello),

    /// Input for one fixed step.
    Input(InputMessage),

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Client is leaving.
    Leave,
}

/// Version handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    /// Client version for compatibility check.
    pub client_version: String,
}

/// One sequenced input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    /// Strafe axis (-1..=1).
    pub movement_x: i8,
    /// Vertical axis (-1..=1).
    pub movement_y: i8,
    /// Forward/back axis (-1..=1).
    pub movement_z: i8,
    /// Roll rate.
    pub roll: f32,
    /// Yaw rate.
    pub yaw: f32,
    /// Pitch rate.
    pub pitch: f32,
    /// Boost held.
    pub boost: bool,
    /// Primary weapon held.
    pub weapon_primary: bool,
    /// Monotonic per connection.
    pub sequence_number: u32,
}

impl From<&InputSnapshot> for InputMessage {
    fn from(input: &InputSnapshot) -> Self {
        let i = &input.intent;
        Self {
            movement_x: i.movement[0],
            movement_y: i.movement[1],
            movement_z: i.movement[2],
            roll: i.roll,
            yaw: i.yaw,
            pitch: i.pitch,
            boost: i.boost,
            weapon_primary: i.weapon_primary,
            sequence_number: input.sequence_number,
        }
    }
}

impl InputMessage {
    /// Convert to a sanitized snapshot for the simulation.
    pub fn to_snapshot(&self) -> InputSnapshot {
        InputSnapshot::new(
            ControlIntent {
                movement: [self.movement_x, self.movement_y, self.movement_z],
                roll: self.roll,
                yaw: self.yaw,
                pitch: self.pitch,
                boost: self.boost,
                weapon_primary: self.weapon_primary,
            },
            self.sequence_number,
        )
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted; the client's entity id and timing.
    Welcome(Welcome),

    /// Entity entered visibility.
    Spawn(EntityUpdate),

    /// Entity left visibility or was removed.
    Despawn {
        /// Entity id.
        id: u32,
    },

    /// World state for the visible entities.
    Snapshot(Snapshot),

    /// Pong response.
    Pong {
        /// Client timestamp from the ping.
        timestamp: u64,
        /// Server frame when answered.
        tick: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Connection accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// The client's own entity.
    pub id: u32,
    /// Fixed step size (ms).
    pub step_ms: f64,
    /// Snapshots per second.
    pub server_update_hz: u32,
    /// Server version.
    pub server_version: String,
}

/// World state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Server frame.
    pub tick: u64,
    /// Visible entities, ascending by id.
    pub entities: Vec<EntityUpdate>,
    /// Hex SHA-256 of the full world state.
    pub state_hash: String,
}

impl Snapshot {
    /// Update for a given entity.
    pub fn entity(&self, id: u32) -> Option<&EntityUpdate> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Per-entity state.
///
/// The recipient's own entity also carries the fields needed to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    /// Entity id.
    pub id: u32,
    /// Position.
    pub position: WireVec3,
    /// Orientation.
    pub rotation: WireQuat,
    /// Last input applied (own entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_input: Option<u32>,
    /// Linear velocity (own entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<WireVec3>,
    /// Angular velocity (own entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity: Option<WireVec3>,
}

impl EntityUpdate {
    /// Update carrying only the pose.
    pub fn pose_only(id: u32, pose: Pose) -> Self {
        Self {
            id,
            position: pose.position.into(),
            rotation: pose.rotation.into(),
            last_processed_input: None,
            velocity: None,
            angular_velocity: None,
        }
    }

    /// Pose carried by the update.
    pub fn pose(&self) -> Pose {
        Pose::new(self.position.into(), Quat::from(self.rotation).normalize())
    }
}

/// `{x, y, z}` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WireVec3 {
    /// X.
    pub x: f32,
    /// Y.
    pub y: f32,
    /// Z.
    pub z: f32,
}

impl From<Vec3> for WireVec3 {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<WireVec3> for Vec3 {
    fn from(v: WireVec3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// `{x, y, z, w}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireQuat {
    /// X.
    pub x: f32,
    /// Y.
    pub y: f32,
    /// Z.
    pub z: f32,
    /// W.
    pub w: f32,
}

impl Default for WireQuat {
    fn default() -> Self {
        Quat::IDENTITY.into()
    }
}

impl From<Quat> for WireQuat {
    fn from(q: Quat) -> Self {
        Self { x: q.x, y: q.y, z: q.z, w: q.w }
    }
}

impl From<WireQuat> for Quat {
    fn from(q: WireQuat) -> Self {
        Quat::from_xyzw(q.x, q.y, q.z, q.w)
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed.
    InvalidMessage,
    /// Input rejected (no entity, backlog full).
    InvalidInput,
    /// Connection limit reached.
    ServerOverloaded,
    /// Version mismatch.
    VersionMismatch,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

/// Decoding failures. The message is dropped; the connection stays up.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed JSON.
    #[error("Invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed binary frame.
    #[error("Invalid binary message: {0}")]
    Binary(#[from] bincode::Error),
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Decode a binary frame. Only input messages travel as binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let input: InputMessage = bincode::deserialize(data)?;
        Ok(Self::Input(input))
    }
}

impl InputMessage {
    /// Serialize to a binary frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! This layer is **non-deterministic** - all simulation runs through `game/`.

pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{
    ClientMessage, EntityUpdate, ErrorCode, InputMessage, ProtocolError, ServerMessage, Snapshot,
    Welcome,
};
pub use server::{GameServer, GameServerError};
pub use session::{ConnectionId, SessionError, WorldSession};

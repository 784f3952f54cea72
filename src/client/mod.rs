//! Client Runtime
//!
//! Local prediction with reconciliation, remote-entity interpolation and the
//! WebSocket transport. Runs the same motion code as the server.

pub mod connection;
pub mod interpolation;
pub mod prediction;
pub mod session;

pub use connection::{ClientError, ServerConnection};
pub use interpolation::RemoteStateBuffer;
pub use prediction::{AuthoritativeState, LocalBody, Predictor};
pub use session::ClientSession;

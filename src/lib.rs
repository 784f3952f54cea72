//! # Starwake Server
//!
//! Authoritative fixed-step space simulation with client-side prediction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     STARWAKE SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── scheduler.rs- Fixed-step accumulator                    │
//! │  ├── math.rs     - Damping, poses, boxes, ray tests          │
//! │  ├── rng.rs      - Seeded SplitMix64 PRNG                    │
//! │  └── hash.rs     - State hashing                             │
//! │                                                              │
//! │  game/           - Simulation (same on client and server)    │
//! │  ├── ecs.rs      - Entity ids and sparse component sets      │
//! │  ├── motion.rs   - Damped integration                        │
//! │  ├── octree.rs   - Spatial index                             │
//! │  ├── collision.rs- Contact detection and response            │
//! │  ├── tick.rs     - One fixed step                            │
//! │  └── simulation.rs - Scheduler-driven facade                 │
//! │                                                              │
//! │  network/        - Server transport (non-deterministic)      │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Connections, visibility, snapshots        │
//! │                                                              │
//! │  client/         - Prediction, reconciliation, interpolation │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! The `core/` and `game/` modules never read the clock and iterate entities
//! in ascending id order (`BTreeMap`/`BTreeSet`, sorted sparse-set ids). The
//! client replays inputs through the same `motion` functions the server uses,
//! so a replay from an authoritative state lands exactly where the server
//! would.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{ServerConfig, SimConfig};
pub use core::rng::DeterministicRng;
pub use core::scheduler::FixedStepScheduler;
pub use game::ecs::EntityId;
pub use game::input::{ControlIntent, InputSnapshot, InputSource};
pub use game::simulation::Simulation;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

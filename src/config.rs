//! Configuration
//!
//! `SimConfig` holds every tunable of the simulation and is shared by the
//! server and the predicting client. `ServerConfig` adds transport settings
//! and can be loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::math::{Aabb, REST_EPSILON};
use crate::core::scheduler::DEFAULT_MAX_FRAME_MS;

// =============================================================================
// SIMULATION
// =============================================================================

/// Ship handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipTuning {
    /// Collision radius.
    pub radius: f32,
    /// Thrust per unit of movement axis (units/s²).
    pub acceleration: f32,
    /// Turn rate per unit of roll/yaw/pitch input.
    pub angular_acceleration: f32,
    /// Velocity kept after one second.
    pub damping: f32,
    /// Angular velocity kept after one second.
    pub angular_damping: f32,
}

impl Default for ShipTuning {
    fn default() -> Self {
        Self {
            radius: 1.0,
            acceleration: 40.0,
            angular_acceleration: 2.5,
            damping: 0.4,
            angular_damping: 0.2,
        }
    }
}

/// Primary weapon projectile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileTuning {
    /// Muzzle speed added to the firer's velocity.
    pub speed: f32,
    /// Collision radius.
    pub radius: f32,
    /// Steps before the projectile despawns.
    pub lifetime_steps: u32,
    /// Steps between shots.
    pub cooldown_steps: u32,
}

impl Default for ProjectileTuning {
    fn default() -> Self {
        Self {
            speed: 120.0,
            radius: 0.25,
            lifetime_steps: 120,
            cooldown_steps: 10,
        }
    }
}

/// Simulation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed steps per second.
    pub tick_rate: u32,
    /// Upper bound for one frame delta fed to the scheduler (ms).
    pub max_frame_ms: f64,
    /// Send a snapshot every N fixed steps.
    pub snapshot_every_steps: u32,
    /// Half extent of the cubic world region.
    pub world_half_extent: f32,
    /// Octree node capacity.
    pub octree_capacity: usize,
    /// Octree depth limit.
    pub octree_max_depth: u32,
    /// Speed below which a body is snapped to rest.
    pub rest_epsilon: f32,
    /// Extra distance added to the collision scan radius.
    pub scan_margin: f32,
    /// Range within which entities are replicated to a connection.
    pub visibility_radius: f32,
    /// Input backlog per connection.
    pub max_pending_inputs: usize,
    /// Seed for spawn placement.
    pub seed: u64,
    /// Ship handling.
    pub ship: ShipTuning,
    /// Projectile handling.
    pub projectile: ProjectileTuning,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::TICK_RATE,
            max_frame_ms: DEFAULT_MAX_FRAME_MS,
            snapshot_every_steps: 1,
            world_half_extent: 1000.0,
            octree_capacity: 1,
            octree_max_depth: 16,
            rest_epsilon: REST_EPSILON,
            scan_margin: 1.0,
            visibility_radius: 500.0,
            max_pending_inputs: 120,
            seed: 0,
            ship: ShipTuning::default(),
            projectile: ProjectileTuning::default(),
        }
    }
}

impl SimConfig {
    /// Fixed step size in milliseconds.
    pub fn step_ms(&self) -> f64 {
        1000.0 / self.tick_rate.max(1) as f64
    }

    /// Snapshots per second.
    pub fn server_update_hz(&self) -> u32 {
        (self.tick_rate.max(1) / self.snapshot_every_steps.max(1)).max(1)
    }

    /// World region.
    pub fn world_bounds(&self) -> Aabb {
        Aabb::cube(glam::Vec3::ZERO, self.world_half_extent)
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue depth per connection.
    pub outbound_queue: usize,
    /// Connections silent for longer are dropped.
    pub connection_timeout: Duration,
    /// Server version string.
    pub version: String,
    /// Simulation parameters.
    pub sim: SimConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_queue: 64,
            connection_timeout: Duration::from_secs(30),
            version: crate::VERSION.to_string(),
            sim: SimConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults. `PORT` wins over `BIND_ADDR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            let port: u16 = parse("PORT", &port)?;
            config.bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        } else if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))?;
        }

        if let Some(v) = lookup("MAX_CONNECTIONS") {
            config.max_connections = parse("MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("CONNECTION_TIMEOUT_SECS") {
            config.connection_timeout = Duration::from_secs(parse("CONNECTION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("TICK_RATE") {
            config.sim.tick_rate = parse("TICK_RATE", &v)?;
            if config.sim.tick_rate == 0 {
                return Err(ConfigError::Invalid {
                    key: "TICK_RATE",
                    value: v,
                });
            }
        }
        if let Some(v) = lookup("SNAPSHOT_EVERY") {
            config.sim.snapshot_every_steps = parse::<u32>("SNAPSHOT_EVERY", &v)?.max(1);
        }
        if let Some(v) = lookup("VISIBILITY_RADIUS") {
            config.sim.visibility_radius = parse("VISIBILITY_RADIUS", &v)?;
        }
        if let Some(v) = lookup("WORLD_SEED") {
            config.sim.seed = parse("WORLD_SEED", &v)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Address could not be parsed.
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    /// Value could not be parsed for the key.
    #[error("Invalid value for {key}: {value}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.tick_rate, 60);
        assert!((config.step_ms() - 16.666).abs() < 0.01);
        assert_eq!(config.server_update_hz(), 60);
        assert_eq!(config.octree_capacity, 1);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "9001"),
            ("BIND_ADDR", "127.0.0.1:1"),
            ("TICK_RATE", "30"),
            ("SNAPSHOT_EVERY", "3"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9001);
        assert_eq!(config.sim.tick_rate, 30);
        assert_eq!(config.sim.server_update_hz(), 10);
    }

    #[test]
    fn test_from_lookup_errors() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("BIND_ADDR", "nope")])),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("TICK_RATE", "0")])),
            Err(ConfigError::Invalid { key: "TICK_RATE", .. })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("MAX_CONNECTIONS", "lots")])),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_sim_config_from_json_uses_defaults() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "tick_rate": 20, "ship": { "radius": 2.0 } }"#).unwrap();
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.ship.radius, 2.0);
        assert_eq!(config.ship.damping, ShipTuning::default().damping);
        assert_eq!(config.max_pending_inputs, 120);
    }
}

//! Session configuration
//!
//! Every field has a default, so a JSON file only needs to name what it
//! overrides. Binaries layer their command-line arguments on top.

use crate::buff::{default_buff_chances, BuffChance};
use crate::error::ConfigError;
use crate::level::LevelEntry;
use crate::projectile::Tunables;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_rate: u32,
    /// Fixed RNG seed; random when absent
    pub seed: Option<u64>,
    pub pool: PoolConfig,
    pub projectile: ProjectileConfig,
    pub avatar: AvatarConfig,
    pub replication: ReplicationConfig,
    #[serde(rename = "match")]
    pub lifecycle: MatchConfig,
    pub buffs: Vec<BuffChance>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            seed: None,
            pool: PoolConfig::default(),
            projectile: ProjectileConfig::default(),
            avatar: AvatarConfig::default(),
            replication: ReplicationConfig::default(),
            lifecycle: MatchConfig::default(),
            buffs: default_buff_chances(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.pool.max_size == 0 {
            return Err(ConfigError::Invalid("pool.max_size must be positive".into()));
        }
        if self.projectile.bounce_limit == 0 {
            return Err(ConfigError::Invalid(
                "projectile.bounce_limit must be positive".into(),
            ));
        }
        if self.replication.resync_interval <= 0.0 {
            return Err(ConfigError::Invalid(
                "replication.resync_interval must be positive".into(),
            ));
        }
        if self.lifecycle.levels.is_empty() {
            return Err(ConfigError::Invalid("match.levels must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.lifecycle.refresh_chance) {
            return Err(ConfigError::Invalid(
                "match.refresh_chance must be within 0..=1".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_rate.max(1) as f32)
    }

    /// Fixed simulation step in seconds
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_size: 5,
            max_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileConfig {
    pub speed: f32,
    pub deadly_duration: f32,
    pub bounce_limit: u32,
    pub radius: f32,
    pub pickup_radius: f32,
    pub gravity: f32,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self {
            speed: 20.0,
            deadly_duration: 3.0,
            bounce_limit: 3,
            radius: 0.25,
            pickup_radius: 2.0,
            gravity: 9.81,
        }
    }
}

impl ProjectileConfig {
    pub fn tunables(&self) -> Tunables {
        Tunables {
            speed: self.speed,
            deadly_duration: self.deadly_duration,
            bounce_limit: self.bounce_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub walk_speed: f32,
    pub radius: f32,
    /// Height of the throw point above the avatar's feet
    pub throw_height: f32,
    /// Minimum seconds between two actions
    pub throw_cooldown: f32,
    /// Extra distance the authority accepts on proxy-reported pickups and hits
    pub tolerance: f32,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            walk_speed: 5.0,
            radius: 0.5,
            throw_height: 1.2,
            throw_cooldown: 0.5,
            tolerance: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub resync_interval: f32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            resync_interval: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub levels: Vec<LevelEntry>,
    pub refresh_chance: f32,
    pub balls_per_level: usize,
    pub exit_duration: f32,
    pub enter_duration: f32,
    pub wait_between_transitions: f32,
    pub load_check_interval: f32,
    pub wait_before_win: f32,
    pub win_screen_duration: f32,
    /// Roster size that starts the first level; 0 waits for an explicit start
    pub auto_start_players: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            levels: (1..=4).map(|id| LevelEntry { id, weight: 1 }).collect(),
            refresh_chance: 0.2,
            balls_per_level: 4,
            exit_duration: 0.5,
            enter_duration: 0.5,
            wait_between_transitions: 0.25,
            load_check_interval: 0.05,
            wait_before_win: 2.0,
            win_screen_duration: 3.0,
            auto_start_players: 2,
        }
    }
}

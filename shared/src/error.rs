use crate::protocol::{BallId, LevelId, ParticipantId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("only the authority may instantiate or acquire pooled entities")]
    NotAuthority,
    #[error("entity pool has no capacity")]
    ZeroCapacity,
    #[error("unknown pooled entity {0}")]
    UnknownEntity(BallId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("participant {0} is already registered")]
    Duplicate(ParticipantId),
    #[error("roster is full")]
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("level {0} is not in the level pool")]
    UnknownLevel(LevelId),
    #[error("the level pool is empty")]
    NoLevels,
    #[error("only the authority may drive the match lifecycle")]
    NotAuthority,
}

/// Terminal conditions that end a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("disconnected from session: {reason}")]
    Disconnected { reason: String },
    #[error("session shut down")]
    Shutdown,
    #[error("failed to connect: {reason}")]
    ConnectFailed { reason: String },
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

//! Replication and match-lifecycle core of a multiplayer dodgeball arena
//!
//! One process is the authority; every other process is a proxy that mirrors
//! it. Game-state changes travel as scoped RPCs over an [`AuthorityChannel`],
//! transforms are published as change-sets with periodic reconciliation and
//! the authority arbitrates every pickup, throw and hit. The transport is not
//! part of this crate: the server and client binaries move [`protocol::Packet`]s
//! over UDP, restoring the channel's reliable ordering with
//! [`reliable::ReliableOutbox`] and [`reliable::OrderedInbox`], and
//! [`loopback::LoopbackHub`] moves envelopes in memory.

pub mod arena;
pub mod buff;
pub mod channel;
pub mod collaborators;
pub mod command;
pub mod config;
pub mod error;
pub mod level;
pub mod lifecycle;
pub mod loopback;
pub mod math;
pub mod pool;
pub mod projectile;
pub mod protocol;
pub mod reliable;
pub mod role;
pub mod roster;
pub mod session;
pub mod task;
pub mod transform;
pub mod world;

pub use channel::{AuthorityChannel, Envelope, Outgoing, RoleKind, Scope};
pub use collaborators::{GameEvent, InputSnapshot};
pub use command::Command;
pub use config::SessionConfig;
pub use error::SessionError;
pub use lifecycle::MatchPhase;
pub use math::Vec3;
pub use protocol::{BallId, EntityRef, LevelId, Packet, ParticipantId, Rpc, PROTOCOL_VERSION};
pub use reliable::{OrderedInbox, ReliableOutbox};
pub use session::{Collaborators, Session};

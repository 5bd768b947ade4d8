//! Wire protocol shared by the authority and its proxies
//!
//! Datagrams carry a [`Packet`]. Connection management uses the dedicated
//! variants, everything that touches game state travels as an addressed
//! [`Envelope`] whose payload is an [`Rpc`]: sequenced and acknowledged in
//! [`Packet::ReliableRpc`], or fire-and-forget in [`Packet::Rpc`] for
//! transform updates.

use crate::channel::Envelope;
use crate::command::Command;
use crate::lifecycle::MatchPhase;
use crate::math::Vec3;
use crate::projectile::BallSnapshot;
use crate::transform::TransformState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever the packet layout changes
pub const PROTOCOL_VERSION: u32 = 2;

/// Participant id reserved for the hosting process
pub const HOST_PARTICIPANT: ParticipantId = 0;

pub type ParticipantId = u32;
pub type LevelId = u32;

/// Stable identifier of a pooled projectile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BallId(pub u32);

impl fmt::Display for BallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ball#{}", self.0)
    }
}

/// Any entity whose transform is replicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Ball(BallId),
    Avatar(ParticipantId),
}

/// Game-level messages routed through the authority channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rpc {
    /// Proxy asks the authority to run a command
    Request(Command),
    /// Authority announces a command it has applied
    Enforce(Command),

    BallSpawned {
        ball: BallId,
    },
    SetActive {
        ball: BallId,
        active: bool,
    },
    /// Full authoritative state of one projectile
    BallSync(BallSnapshot),
    Bounce {
        ball: BallId,
        normal: Vec3,
        direction: Vec3,
        count: u32,
    },

    /// Per-tick change-set
    Transform {
        entity: EntityRef,
        state: TransformState,
    },
    /// Periodic forced resync
    Reconcile {
        entity: EntityRef,
        state: TransformState,
    },
    /// Movement intent of the sending participant
    AvatarMove {
        movement: Vec3,
    },

    /// Also sent for everyone already present when a participant joins
    ParticipantJoined {
        participant: ParticipantId,
        slot: u8,
        alive: bool,
    },
    ParticipantLeft {
        participant: ParticipantId,
    },

    GoToLevel {
        level: LevelId,
    },
    ClientLoaded,
    EnterLevel,
    DeclareWinner {
        winner: ParticipantId,
    },
    MatchSync {
        phase: MatchPhase,
        level: Option<LevelId>,
    },
}

impl Rpc {
    /// Whether a lost copy must be resent; transforms are superseded by the next one
    pub fn is_reliable(&self) -> bool {
        !matches!(self, Rpc::Transform { .. } | Rpc::Reconcile { .. })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect { client_version: u32 },
    Connected { participant_id: ParticipantId },
    Rpc(Envelope),
    ReliableRpc { seq: u32, envelope: Envelope },
    Ack { seq: u32 },
    Heartbeat,
    Disconnect,
    Disconnected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RoleKind, Scope};
    use bincode::{deserialize, serialize};

    #[test]
    fn test_rpc_packet_serialization() {
        let packet = Packet::Rpc(Envelope {
            sender: 3,
            sender_role: RoleKind::Proxy,
            scope: Scope::ToAuthority,
            payload: Rpc::Request(Command::Pickup {
                ball: BallId(7),
                by: 3,
            }),
        });

        let serialized = serialize(&packet).unwrap();
        let deserialized: Packet = deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Rpc(envelope) => {
                assert_eq!(envelope.sender, 3);
                assert_eq!(envelope.scope, Scope::ToAuthority);
                assert_eq!(
                    envelope.payload,
                    Rpc::Request(Command::Pickup {
                        ball: BallId(7),
                        by: 3
                    })
                );
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_connection_packets_stay_small() {
        let connect = serialize(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .unwrap();
        let heartbeat = serialize(&Packet::Heartbeat).unwrap();

        assert!(connect.len() <= 8);
        assert!(heartbeat.len() <= 4);
    }

    #[test]
    fn test_only_transforms_are_unreliable() {
        let transform = Rpc::Transform {
            entity: EntityRef::Ball(BallId(1)),
            state: TransformState::at(Vec3::ZERO),
        };
        assert!(!transform.is_reliable());
        assert!(Rpc::ClientLoaded.is_reliable());
        assert!(Rpc::EnterLevel.is_reliable());
        assert!(Rpc::Request(Command::Drop { ball: BallId(2), by: 1 }).is_reliable());
    }

    #[test]
    fn test_ball_id_display() {
        assert_eq!(BallId(12).to_string(), "ball#12");
    }
}

//! Ownership-transfer commands with a predict phase and an apply phase
//!
//! A proxy predicts a command locally and requests it from the authority.
//! The authority validates, applies and broadcasts the enforced command
//! followed by snapshots of every projectile it touched, which overwrite
//! whatever the proxies predicted.

use crate::collaborators::GameEvent;
use crate::lifecycle::MatchPhase;
use crate::math::Vec3;
use crate::projectile::{BallState, TransitionError};
use crate::protocol::{BallId, ParticipantId};
use crate::world::World;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Pickup {
        ball: BallId,
        by: ParticipantId,
    },
    Throw {
        ball: BallId,
        by: ParticipantId,
        target: Vec3,
    },
    Drop {
        ball: BallId,
        by: ParticipantId,
    },
    Hit {
        ball: BallId,
        victim: ParticipantId,
    },
}

/// Why the authority refused a command; never surfaced beyond a log line
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("participant {requester} cannot act for participant {actor}")]
    Impersonation {
        requester: ParticipantId,
        actor: ParticipantId,
    },
    #[error("unknown projectile {0}")]
    UnknownBall(BallId),
    #[error("participant {0} has no avatar")]
    NoAvatar(ParticipantId),
    #[error("participant {0} is not alive")]
    NotAlive(ParticipantId),
    #[error("{0} was already claimed this tick")]
    Contended(BallId),
    #[error("participant {0} already holds a projectile")]
    HandsFull(ParticipantId),
    #[error("{ball} is out of reach of participant {by}")]
    OutOfRange { ball: BallId, by: ParticipantId },
    #[error("{ball} cannot hit participant {victim}")]
    Harmless { ball: BallId, victim: ParticipantId },
    #[error("hits only count while playing, not during {0:?}")]
    OutOfPlay(MatchPhase),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Side effects of applying a command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub events: Vec<GameEvent>,
    pub winner: Option<ParticipantId>,
    /// Projectiles whose authoritative state must be re-sent
    pub touched: Vec<BallId>,
}

impl CommandOutcome {
    pub fn merge(&mut self, other: CommandOutcome) {
        self.events.extend(other.events);
        self.winner = self.winner.or(other.winner);
        self.touched.extend(other.touched);
    }
}

impl Command {
    pub fn ball(&self) -> BallId {
        match *self {
            Command::Pickup { ball, .. }
            | Command::Throw { ball, .. }
            | Command::Drop { ball, .. }
            | Command::Hit { ball, .. } => ball,
        }
    }

    /// The participant the command acts for
    pub fn actor(&self) -> ParticipantId {
        match *self {
            Command::Pickup { by, .. } | Command::Throw { by, .. } | Command::Drop { by, .. } => by,
            Command::Hit { victim, .. } => victim,
        }
    }

    /// Proxies may only request commands for themselves
    pub fn check_requester(&self, requester: ParticipantId) -> Result<(), Rejection> {
        let actor = self.actor();
        if requester != actor {
            return Err(Rejection::Impersonation { requester, actor });
        }
        Ok(())
    }

    /// Eliminations are frozen outside of `Playing`
    pub fn check_phase(&self, phase: MatchPhase) -> Result<(), Rejection> {
        match self {
            Command::Hit { .. } if phase != MatchPhase::Playing => Err(Rejection::OutOfPlay(phase)),
            _ => Ok(()),
        }
    }

    /// Checks the command against the given world, allowing the avatar tolerance for latency
    pub fn validate(&self, world: &World) -> Result<(), Rejection> {
        let id = self.ball();
        let ball = world.pool.get(id).ok_or(Rejection::UnknownBall(id))?;
        if !ball.is_active() {
            return Err(TransitionError::Inactive(id).into());
        }

        let actor = self.actor();
        let avatar = world.avatar(actor).ok_or(Rejection::NoAvatar(actor))?;
        if !world.roster.is_alive(actor) {
            return Err(Rejection::NotAlive(actor));
        }
        let tolerance = world.avatar_config().tolerance;

        match *self {
            Command::Pickup { ball: id, by } => {
                if world.is_claimed(id) {
                    return Err(Rejection::Contended(id));
                }
                if avatar.held().is_some() {
                    return Err(Rejection::HandsFull(by));
                }
                if ball.state() == BallState::Deadly {
                    return Err(TransitionError::Deadly(id).into());
                }
                if let Some(owner) = ball.owner() {
                    return Err(TransitionError::Owned { ball: id, owner }.into());
                }

                let range = world.projectile_config().pickup_radius + tolerance;
                match world.distance_to_ball(by, id) {
                    Some(distance) if distance <= range => Ok(()),
                    _ => Err(Rejection::OutOfRange { ball: id, by }),
                }
            }
            Command::Throw { ball: id, by, target } => {
                if ball.state() != BallState::Held || ball.owner() != Some(by) {
                    return Err(TransitionError::NotHolder { ball: id, by }.into());
                }
                let origin = world.throw_origin(by).ok_or(Rejection::NoAvatar(by))?;
                if (target - origin).normalize().is_zero() {
                    return Err(TransitionError::DegenerateAim.into());
                }
                Ok(())
            }
            Command::Drop { ball: id, by } => {
                if ball.state() != BallState::Held || ball.owner() != Some(by) {
                    return Err(TransitionError::NotHolder { ball: id, by }.into());
                }
                Ok(())
            }
            Command::Hit { ball: id, victim } => {
                let lethal = ball.is_deadly()
                    && ball.owner() != Some(victim)
                    && world.ball_touches(id, victim, tolerance);
                if !lethal {
                    return Err(Rejection::Harmless { ball: id, victim });
                }
                Ok(())
            }
        }
    }

    /// Proxy-side local apply for responsiveness; the authority overwrites it later
    pub fn predict(&self, world: &mut World) {
        let (by, held) = match *self {
            Command::Pickup { ball, by } => {
                let result = match world.pool.get_mut(ball) {
                    Some(projectile) => projectile.pickup(by),
                    None => Err(TransitionError::Inactive(ball)),
                };
                if let Err(e) = result {
                    debug!("Prediction of {:?} failed: {}", self, e);
                    return;
                }
                (by, Some(ball))
            }
            Command::Throw { ball, by, target } => {
                let origin = world.throw_origin(by).unwrap_or(target);
                let result = match world.pool.get_mut(ball) {
                    Some(projectile) => projectile.throw(by, origin, target).map(|_| ()),
                    None => Err(TransitionError::Inactive(ball)),
                };
                if let Err(e) = result {
                    debug!("Prediction of {:?} failed: {}", self, e);
                    return;
                }
                (by, None)
            }
            // Eliminations and drops are only ever shown once enforced
            Command::Drop { .. } | Command::Hit { .. } => return,
        };

        world.set_held(by, held);
        world.start_cooldown(by);
    }

    /// Authoritative apply. Proxies run it too on enforcement, where a step
    /// already predicted locally is skipped.
    pub fn apply(&self, world: &mut World) -> CommandOutcome {
        let mut outcome = CommandOutcome {
            touched: vec![self.ball()],
            ..CommandOutcome::default()
        };

        match *self {
            Command::Pickup { ball, by } => {
                world.claim(ball);
                if let Some(projectile) = world.pool.get_mut(ball) {
                    let predicted =
                        projectile.state() == BallState::Held && projectile.owner() == Some(by);
                    if !predicted {
                        if let Err(e) = projectile.pickup(by) {
                            debug!("Pickup of {} by {} not applied: {}", ball, by, e);
                        }
                    }
                }
                world.set_held(by, Some(ball));
                world.start_cooldown(by);
                outcome.events.push(GameEvent::BallPickedUp { ball, by });
            }
            Command::Throw { ball, by, target } => {
                let origin = world.throw_origin(by).unwrap_or(target);
                if let Some(projectile) = world.pool.get_mut(ball) {
                    if projectile.state() == BallState::Held {
                        if let Err(e) = projectile.throw(by, origin, target) {
                            debug!("Throw of {} by {} not applied: {}", ball, by, e);
                        }
                    }
                    outcome.events.push(GameEvent::BallThrown {
                        ball,
                        by,
                        direction: projectile.direction(),
                        scale: projectile.buff().deadly_scale(),
                    });
                }
                world.set_held(by, None);
                world.start_cooldown(by);
            }
            Command::Drop { ball, by } => {
                if let Some(projectile) = world.pool.get_mut(ball) {
                    projectile.drop_held();
                }
                world.set_held(by, None);
                outcome.events.push(GameEvent::BallDropped { ball, by });
            }
            Command::Hit { ball, victim } => {
                outcome.events.push(GameEvent::ParticipantEliminated {
                    participant: victim,
                    ball,
                });

                if let Some(held) = world.avatar(victim).and_then(|a| a.held()) {
                    if let Some(projectile) = world.pool.get_mut(held) {
                        projectile.drop_held();
                    }
                    world.set_held(victim, None);
                    outcome.touched.push(held);
                    outcome.events.push(GameEvent::BallDropped {
                        ball: held,
                        by: victim,
                    });
                }
                world.set_intent(victim, Vec3::ZERO);
                outcome.winner = world.roster.eliminate(victim);
            }
        }
        outcome
    }
}

//! Role strategies selected once per session
//!
//! The authority validates, applies and broadcasts; it also runs projectile
//! physics, hit detection and transform publishing. A proxy predicts, requests
//! and mirrors, and checks its own avatar for hits so it can report them early.

use crate::channel::{AuthorityChannel, RoleKind, Scope};
use crate::collaborators::{GameEvent, MotionProbe};
use crate::command::{Command, CommandOutcome};
use crate::lifecycle::MatchPhase;
use crate::math::Vec3;
use crate::projectile::ProjectileEvent;
use crate::protocol::{BallId, EntityRef, ParticipantId, Rpc};
use crate::transform::TransformUpdate;
use crate::world::World;
use log::{debug, warn};
use std::collections::BTreeSet;

/// Everything a role touches during one call
pub struct RoleContext<'a> {
    pub world: &'a mut World,
    pub channel: &'a mut AuthorityChannel,
    pub probe: &'a dyn MotionProbe,
    pub phase: MatchPhase,
}

pub trait RoleStrategy: Send + Sync {
    fn kind(&self) -> RoleKind;

    /// The local participant wants to run a command
    fn issue(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome;

    /// A remote participant asked the authority to run a command
    fn on_request(&mut self, sender: ParticipantId, command: Command, ctx: &mut RoleContext) -> CommandOutcome;

    /// The authority announced a command it applied
    fn on_enforce(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome;

    /// Runs a command on behalf of a participant, e.g. dropping a departing holder's projectile
    fn execute(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome;

    fn simulate(&mut self, dt: f32, ctx: &mut RoleContext) -> CommandOutcome;

    fn replicate(&mut self, dt: f32, ctx: &mut RoleContext);
}

pub fn strategy_for(kind: RoleKind) -> Box<dyn RoleStrategy> {
    match kind {
        RoleKind::Authority => Box::new(AuthorityRole),
        RoleKind::Proxy => Box::new(ProxyRole::default()),
    }
}

fn sync_ball(ball: BallId, ctx: &mut RoleContext) {
    if let Some(projectile) = ctx.world.pool.get(ball) {
        ctx.channel
            .send(Scope::ToAllFromAuthority, Rpc::BallSync(projectile.snapshot()));
    }
}

#[derive(Debug, Default)]
pub struct AuthorityRole;

impl RoleStrategy for AuthorityRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Authority
    }

    fn issue(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome {
        self.execute(command, ctx)
    }

    fn on_request(&mut self, sender: ParticipantId, command: Command, ctx: &mut RoleContext) -> CommandOutcome {
        if let Err(rejection) = command.check_requester(sender) {
            warn!("Rejected {:?} from {}: {}", command, sender, rejection);
            return CommandOutcome::default();
        }
        self.execute(command, ctx)
    }

    fn on_enforce(&mut self, _command: Command, _ctx: &mut RoleContext) -> CommandOutcome {
        // Applied before it was broadcast
        CommandOutcome::default()
    }

    fn execute(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome {
        let checked = command
            .check_phase(ctx.phase)
            .and_then(|_| command.validate(ctx.world));
        if let Err(rejection) = checked {
            debug!("Rejected {:?}: {}", command, rejection);
            // Correct whatever the requester predicted
            sync_ball(command.ball(), ctx);
            return CommandOutcome::default();
        }

        let outcome = command.apply(ctx.world);
        ctx.channel
            .send(Scope::ToAllFromAuthority, Rpc::Enforce(command));
        for ball in &outcome.touched {
            sync_ball(*ball, ctx);
        }
        outcome
    }

    fn simulate(&mut self, dt: f32, ctx: &mut RoleContext) -> CommandOutcome {
        let mut outcome = CommandOutcome::default();

        ctx.world.move_avatars(dt);
        ctx.world.cool_down(dt);
        ctx.world.attach_held_balls();

        for (ball, event) in ctx.world.step_projectiles(dt, ctx.probe) {
            match event {
                ProjectileEvent::Bounced(bounce) => {
                    let explosion = ctx
                        .world
                        .pool
                        .get(ball)
                        .map(|p| p.buff().explodes_on_bounce())
                        .unwrap_or(false);
                    ctx.channel.send(
                        Scope::ToAllFromAuthority,
                        Rpc::Bounce {
                            ball,
                            normal: bounce.normal,
                            direction: bounce.direction,
                            count: bounce.count,
                        },
                    );
                    outcome.events.push(GameEvent::BallBounced {
                        ball,
                        normal: bounce.normal,
                        direction: bounce.direction,
                        count: bounce.count,
                        explosion,
                    });
                }
                ProjectileEvent::NotDeadly => {
                    sync_ball(ball, ctx);
                    outcome.events.push(GameEvent::BallNotDeadly { ball });
                }
            }
        }

        if ctx.phase == MatchPhase::Playing {
            for (ball, victim) in ctx.world.detect_hits() {
                outcome.merge(self.execute(Command::Hit { ball, victim }, ctx));
            }
        }
        outcome
    }

    fn replicate(&mut self, dt: f32, ctx: &mut RoleContext) {
        let mut updates = Vec::new();

        for id in ctx.world.pool.active_ids() {
            if let Some(ball) = ctx.world.pool.get_mut(id) {
                if let Some(update) = ball.transform.publish(dt) {
                    updates.push((EntityRef::Ball(id), update));
                }
            }
        }
        for avatar in ctx.world.avatars_mut() {
            if let Some(update) = avatar.transform.publish(dt) {
                updates.push((EntityRef::Avatar(avatar.participant()), update));
            }
        }

        for (entity, update) in updates {
            let rpc = match update {
                TransformUpdate::Delta(state) => Rpc::Transform { entity, state },
                TransformUpdate::Reconcile(state) => Rpc::Reconcile { entity, state },
            };
            ctx.channel.send(Scope::ToAllFromAuthority, rpc);
        }
    }
}

#[derive(Debug, Default)]
pub struct ProxyRole {
    /// Projectiles already reported as hitting the local avatar
    reported: BTreeSet<BallId>,
    last_intent: Option<Vec3>,
}

impl RoleStrategy for ProxyRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Proxy
    }

    fn issue(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome {
        if let Err(rejection) = command.validate(ctx.world) {
            debug!("Not requesting {:?}: {}", command, rejection);
            return CommandOutcome::default();
        }

        command.predict(ctx.world);
        ctx.channel.send(Scope::ToAuthority, Rpc::Request(command));
        CommandOutcome::default()
    }

    fn on_request(&mut self, sender: ParticipantId, command: Command, _ctx: &mut RoleContext) -> CommandOutcome {
        warn!("Proxy received {:?} request from {}", command, sender);
        CommandOutcome::default()
    }

    fn on_enforce(&mut self, command: Command, ctx: &mut RoleContext) -> CommandOutcome {
        let mut outcome = command.apply(ctx.world);
        // Only the authority declares winners
        outcome.winner = None;
        outcome
    }

    fn execute(&mut self, command: Command, _ctx: &mut RoleContext) -> CommandOutcome {
        warn!("Proxy cannot execute {:?}", command);
        CommandOutcome::default()
    }

    fn simulate(&mut self, dt: f32, ctx: &mut RoleContext) -> CommandOutcome {
        let local = ctx.channel.local_id();
        ctx.world.move_avatar(local, dt);
        ctx.world.cool_down(dt);
        ctx.world.attach_held_balls();

        let world = &*ctx.world;
        self.reported
            .retain(|ball| world.pool.get(*ball).map(|b| b.is_deadly()).unwrap_or(false));

        if ctx.phase == MatchPhase::Playing {
            let hits: Vec<BallId> = ctx
                .world
                .detect_hits()
                .into_iter()
                .filter(|(_, victim)| *victim == local)
                .map(|(ball, _)| ball)
                .collect();

            for ball in hits {
                if self.reported.insert(ball) {
                    debug!("Reporting hit by {} on local avatar", ball);
                    ctx.channel.send(
                        Scope::ToAuthority,
                        Rpc::Request(Command::Hit { ball, victim: local }),
                    );
                }
            }
        }
        CommandOutcome::default()
    }

    fn replicate(&mut self, _dt: f32, ctx: &mut RoleContext) {
        let local = ctx.channel.local_id();
        let Some(intent) = ctx.world.avatar(local).map(|a| a.intent()) else {
            return;
        };

        if self.last_intent != Some(intent) {
            self.last_intent = Some(intent);
            ctx.channel
                .send(Scope::ToAuthority, Rpc::AvatarMove { movement: intent });
        }
    }
}

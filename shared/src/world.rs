//! Simulation state owned by one session: projectiles, roster and avatars

use crate::collaborators::MotionProbe;
use crate::config::{AvatarConfig, ProjectileConfig, SessionConfig};
use crate::math::Vec3;
use crate::pool::EntityPool;
use crate::projectile::{BallState, ProjectileEvent};
use crate::protocol::{BallId, EntityRef, ParticipantId};
use crate::roster::RosterManager;
use crate::transform::{ReplicatedTransform, TransformState};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct Avatar {
    participant: ParticipantId,
    pub transform: ReplicatedTransform,
    held: Option<BallId>,
    intent: Vec3,
    cooldown: f32,
    radius: f32,
}

impl Avatar {
    pub fn new(participant: ParticipantId, position: Vec3, radius: f32, resync_interval: f32) -> Self {
        Self {
            participant,
            transform: ReplicatedTransform::new(position, resync_interval),
            held: None,
            intent: Vec3::ZERO,
            cooldown: 0.0,
            radius,
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position()
    }

    pub fn held(&self) -> Option<BallId> {
        self.held
    }

    pub fn intent(&self) -> Vec3 {
        self.intent
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn can_act(&self) -> bool {
        self.cooldown <= 0.0
    }

    /// Whether a point lies within the avatar's body, grown by `reach`
    fn touches(&self, point: Vec3, reach: f32, height: f32) -> bool {
        let base = self.position();
        let horizontal = (point - base).flatten().magnitude();
        horizontal <= self.radius + reach
            && point.y >= base.y - reach
            && point.y <= base.y + height + reach
    }
}

pub struct World {
    pub pool: EntityPool,
    pub roster: RosterManager,
    avatars: BTreeMap<ParticipantId, Avatar>,
    /// Projectiles already picked up this tick
    claims: BTreeSet<BallId>,
    avatar_config: AvatarConfig,
    projectile_config: ProjectileConfig,
    resync_interval: f32,
}

impl World {
    pub fn new(config: &SessionConfig) -> Self {
        let resync_interval = config.replication.resync_interval;
        Self {
            pool: EntityPool::new(&config.pool, &config.projectile, resync_interval),
            roster: RosterManager::new(),
            avatars: BTreeMap::new(),
            claims: BTreeSet::new(),
            avatar_config: config.avatar.clone(),
            projectile_config: config.projectile.clone(),
            resync_interval,
        }
    }

    pub fn avatar_config(&self) -> &AvatarConfig {
        &self.avatar_config
    }

    pub fn projectile_config(&self) -> &ProjectileConfig {
        &self.projectile_config
    }

    pub fn begin_tick(&mut self) {
        self.claims.clear();
    }

    /// First writer wins: false when the projectile was already claimed this tick
    pub fn claim(&mut self, ball: BallId) -> bool {
        self.claims.insert(ball)
    }

    pub fn is_claimed(&self, ball: BallId) -> bool {
        self.claims.contains(&ball)
    }

    /// Places a participant's avatar, creating it on first spawn
    pub fn spawn_avatar(&mut self, participant: ParticipantId, position: Vec3) {
        let radius = self.avatar_config.radius;
        let resync_interval = self.resync_interval;
        let avatar = self
            .avatars
            .entry(participant)
            .or_insert_with(|| Avatar::new(participant, position, radius, resync_interval));

        avatar.transform.reset(position);
        avatar.held = None;
        avatar.intent = Vec3::ZERO;
        avatar.cooldown = 0.0;
        avatar.transform.request_resync();
    }

    pub fn despawn_avatar(&mut self, participant: ParticipantId) -> Option<Avatar> {
        self.avatars.remove(&participant)
    }

    pub fn avatar(&self, participant: ParticipantId) -> Option<&Avatar> {
        self.avatars.get(&participant)
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn avatars_mut(&mut self) -> impl Iterator<Item = &mut Avatar> {
        self.avatars.values_mut()
    }

    pub fn set_intent(&mut self, participant: ParticipantId, movement: Vec3) {
        if let Some(avatar) = self.avatars.get_mut(&participant) {
            avatar.intent = movement.flatten().clamp_length(1.0);
        }
    }

    pub fn set_held(&mut self, participant: ParticipantId, ball: Option<BallId>) {
        if let Some(avatar) = self.avatars.get_mut(&participant) {
            avatar.held = ball;
        }
    }

    pub fn start_cooldown(&mut self, participant: ParticipantId) {
        let cooldown = self.avatar_config.throw_cooldown;
        if let Some(avatar) = self.avatars.get_mut(&participant) {
            avatar.cooldown = cooldown;
        }
    }

    /// Where a participant holds and throws projectiles from
    pub fn throw_origin(&self, participant: ParticipantId) -> Option<Vec3> {
        let height = self.avatar_config.throw_height;
        self.avatars
            .get(&participant)
            .map(|avatar| avatar.position() + Vec3::new(0.0, height, 0.0))
    }

    /// Closest free projectile within pickup range of the participant
    pub fn closest_free_ball(&self, participant: ParticipantId) -> Option<BallId> {
        let origin = self.avatars.get(&participant)?.position();
        let range = self.projectile_config.pickup_radius;

        self.pool
            .iter_active()
            .filter(|ball| ball.is_free() && !self.is_claimed(ball.id()))
            .map(|ball| (ball.id(), ball.transform.position().distance(origin)))
            .filter(|(_, distance)| *distance <= range)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Distance from a participant's avatar to a projectile
    pub fn distance_to_ball(&self, participant: ParticipantId, ball: BallId) -> Option<f32> {
        let avatar = self.avatars.get(&participant)?;
        let ball = self.pool.get(ball)?;
        Some(ball.transform.position().distance(avatar.position()))
    }

    /// Whether a projectile touches a participant's body, grown by `reach`
    pub fn ball_touches(&self, ball: BallId, participant: ParticipantId, reach: f32) -> bool {
        let (Some(avatar), Some(ball)) = (self.avatars.get(&participant), self.pool.get(ball)) else {
            return false;
        };
        avatar.touches(
            ball.transform.position(),
            ball.radius() + reach,
            self.body_height(),
        )
    }

    fn body_height(&self) -> f32 {
        self.avatar_config.throw_height + self.avatar_config.radius
    }

    /// Walks an avatar along its intent; eliminated participants stay put
    pub fn move_avatar(&mut self, participant: ParticipantId, dt: f32) {
        let alive = self.roster.is_alive(participant);
        let speed = self.avatar_config.walk_speed;
        let Some(avatar) = self.avatars.get_mut(&participant) else {
            return;
        };

        let velocity = if alive { avatar.intent * speed } else { Vec3::ZERO };
        let position = avatar.position() + velocity * dt;
        avatar.transform.set_position(position);
        avatar.transform.set_velocity(velocity);
    }

    pub fn move_avatars(&mut self, dt: f32) {
        let participants: Vec<ParticipantId> = self.avatars.keys().copied().collect();
        for participant in participants {
            self.move_avatar(participant, dt);
        }
    }

    pub fn cool_down(&mut self, dt: f32) {
        for avatar in self.avatars.values_mut() {
            avatar.cooldown = (avatar.cooldown - dt).max(0.0);
        }
    }

    /// Keeps held projectiles at their holder's throw point
    pub fn attach_held_balls(&mut self) {
        let height = self.avatar_config.throw_height;
        for avatar in self.avatars.values() {
            let Some(id) = avatar.held else {
                continue;
            };
            if let Some(ball) = self.pool.get_mut(id) {
                if ball.state() == BallState::Held {
                    ball.transform
                        .set_position(avatar.position() + Vec3::new(0.0, height, 0.0));
                }
            }
        }
    }

    /// Advances authoritative projectile physics
    pub fn step_projectiles(&mut self, dt: f32, probe: &dyn MotionProbe) -> Vec<(BallId, ProjectileEvent)> {
        let gravity = self.projectile_config.gravity;
        let mut events = Vec::new();
        for id in self.pool.active_ids() {
            if let Some(ball) = self.pool.get_mut(id) {
                events.extend(ball.advance(dt, probe, gravity).into_iter().map(|e| (id, e)));
            }
        }
        events
    }

    /// Deadly projectiles touching a living avatar other than their owner
    pub fn detect_hits(&self) -> Vec<(BallId, ParticipantId)> {
        let mut hits = Vec::new();
        for ball in self.pool.iter_active().filter(|b| b.is_deadly()) {
            for avatar in self.avatars.values() {
                let victim = avatar.participant;
                if ball.owner() == Some(victim) || !self.roster.is_alive(victim) {
                    continue;
                }
                if self.ball_touches(ball.id(), victim, 0.0) {
                    hits.push((ball.id(), victim));
                    break;
                }
            }
        }
        hits
    }

    /// Re-derives who holds a projectile after its state was overwritten
    pub fn sync_holder(&mut self, ball: BallId) {
        let holder = self
            .pool
            .get(ball)
            .filter(|b| b.is_active() && b.state() == BallState::Held)
            .and_then(|b| b.owner());

        for avatar in self.avatars.values_mut() {
            if avatar.held == Some(ball) && holder != Some(avatar.participant) {
                avatar.held = None;
            }
        }
        if let Some(avatar) = holder.and_then(|p| self.avatars.get_mut(&p)) {
            avatar.held = Some(ball);
        }
    }

    pub fn clear_holdings(&mut self) {
        for avatar in self.avatars.values_mut() {
            avatar.held = None;
        }
    }

    /// Applies a replicated transform on a proxy
    ///
    /// The local avatar keeps its prediction on change-sets that stay within
    /// `tolerance`; reconciliation snapshots always win.
    pub fn apply_transform(
        &mut self,
        entity: EntityRef,
        state: &TransformState,
        local: ParticipantId,
        reconcile: bool,
    ) -> bool {
        match entity {
            EntityRef::Ball(id) => match self.pool.get_mut(id) {
                Some(ball) if reconcile => {
                    ball.transform.set_force_update(true);
                    let applied = ball.transform.apply(state);
                    ball.transform.set_force_update(false);
                    applied
                }
                Some(ball) => ball.transform.apply(state),
                None => false,
            },
            EntityRef::Avatar(participant) => {
                let tolerance = self.avatar_config.tolerance;
                if !self.avatars.contains_key(&participant) {
                    self.spawn_avatar(participant, state.position);
                }
                let Some(avatar) = self.avatars.get_mut(&participant) else {
                    return false;
                };

                let drift = avatar.position().distance(state.position);
                if participant == local && !reconcile && drift <= tolerance {
                    return false;
                }
                avatar.transform.apply(state)
            }
        }
    }
}

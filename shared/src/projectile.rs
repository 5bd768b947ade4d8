//! Projectile state machine
//!
//! A projectile is `Idle` while pooled, lying around or after its deadliness
//! ends, `Held` between a pickup and a throw or drop, and `Deadly` from a throw
//! until it expires or reaches its bounce limit. The thrower stays the owner
//! through the whole deadly flight so it cannot be hit by its own throw.

use crate::buff::BuffKind;
use crate::collaborators::MotionProbe;
use crate::math::{reflect, Vec3, EPSILON};
use crate::protocol::{BallId, ParticipantId};
use crate::transform::{ReplicatedTransform, TransformState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Horizontal speed kept per floor contact by a rolling projectile
const FLOOR_FRICTION: f32 = 0.85;
/// Fraction of speed kept when deadliness ends mid-flight
const SPENT_DAMPING: f32 = 0.5;

/// Per-instance parameters restored to the type defaults on every reset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    pub speed: f32,
    pub deadly_duration: f32,
    pub bounce_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Membership {
    Pooled,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BallState {
    Idle,
    Deadly,
    Held,
}

/// Full authoritative state of a projectile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub ball: BallId,
    pub membership: Membership,
    pub state: BallState,
    pub owner: Option<ParticipantId>,
    pub direction: Vec3,
    pub bounce_count: u32,
    pub tunables: Tunables,
    pub buff: BuffKind,
    pub deadly_remaining: f32,
    pub transform: TransformState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{0} is not active")]
    Inactive(BallId),
    #[error("{ball} is already owned by participant {owner}")]
    Owned { ball: BallId, owner: ParticipantId },
    #[error("{0} is deadly")]
    Deadly(BallId),
    #[error("{ball} is not held by participant {by}")]
    NotHolder { ball: BallId, by: ParticipantId },
    #[error("aim target coincides with the throw origin")]
    DegenerateAim,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounce {
    pub normal: Vec3,
    pub direction: Vec3,
    pub count: u32,
    /// The bounce limit was reached and the projectile went idle
    pub expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectileEvent {
    Bounced(Bounce),
    NotDeadly,
}

#[derive(Debug, Clone)]
pub struct Projectile {
    id: BallId,
    membership: Membership,
    state: BallState,
    owner: Option<ParticipantId>,
    direction: Vec3,
    bounce_count: u32,
    tunables: Tunables,
    defaults: Tunables,
    deadly_remaining: f32,
    buff: BuffKind,
    radius: f32,
    pub transform: ReplicatedTransform,
}

impl Projectile {
    pub fn new(id: BallId, defaults: Tunables, radius: f32, resync_interval: f32) -> Self {
        Self {
            id,
            membership: Membership::Pooled,
            state: BallState::Idle,
            owner: None,
            direction: Vec3::ZERO,
            bounce_count: 0,
            tunables: defaults,
            defaults,
            deadly_remaining: 0.0,
            buff: BuffKind::Plain,
            radius,
            transform: ReplicatedTransform::new(Vec3::ZERO, resync_interval),
        }
    }

    pub fn id(&self) -> BallId {
        self.id
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub fn is_active(&self) -> bool {
        self.membership == Membership::Active
    }

    pub fn state(&self) -> BallState {
        self.state
    }

    pub fn owner(&self) -> Option<ParticipantId> {
        self.owner
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn bounce_count(&self) -> u32 {
        self.bounce_count
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn buff(&self) -> BuffKind {
        self.buff
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn deadly_remaining(&self) -> f32 {
        self.deadly_remaining
    }

    pub fn is_deadly(&self) -> bool {
        self.state == BallState::Deadly
    }

    /// Active, idle and unowned, i.e. available for pickup
    pub fn is_free(&self) -> bool {
        self.is_active() && self.state == BallState::Idle && self.owner.is_none()
    }

    pub(crate) fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    pub fn reset_to_defaults(&mut self) {
        self.state = BallState::Idle;
        self.owner = None;
        self.direction = Vec3::ZERO;
        self.bounce_count = 0;
        self.tunables = self.defaults;
        self.deadly_remaining = 0.0;
        self.buff = BuffKind::Plain;
        self.transform.reset(Vec3::ZERO);
    }

    pub fn apply_buff(&mut self, buff: BuffKind) {
        self.buff = buff;
        buff.on_spawn(&mut self.tunables);
    }

    pub fn pickup(&mut self, holder: ParticipantId) -> Result<(), TransitionError> {
        if !self.is_active() {
            return Err(TransitionError::Inactive(self.id));
        }
        if self.state == BallState::Deadly {
            return Err(TransitionError::Deadly(self.id));
        }
        if let Some(owner) = self.owner {
            return Err(TransitionError::Owned {
                ball: self.id,
                owner,
            });
        }

        self.owner = Some(holder);
        self.state = BallState::Held;
        self.transform.suspend();
        Ok(())
    }

    /// Returns the normalized travel direction
    pub fn throw(
        &mut self,
        thrower: ParticipantId,
        origin: Vec3,
        target: Vec3,
    ) -> Result<Vec3, TransitionError> {
        if self.state != BallState::Held || self.owner != Some(thrower) {
            return Err(TransitionError::NotHolder {
                ball: self.id,
                by: thrower,
            });
        }

        let direction = (target - origin).normalize();
        if direction.is_zero() {
            return Err(TransitionError::DegenerateAim);
        }

        self.state = BallState::Deadly;
        self.direction = direction;
        self.bounce_count = 0;
        self.deadly_remaining = self.tunables.deadly_duration;
        self.transform.resume();
        self.transform.set_position(origin);
        self.transform.set_velocity(direction * self.tunables.speed);
        Ok(direction)
    }

    /// Releases a held projectile without making it deadly, returning the previous holder
    pub fn drop_held(&mut self) -> Option<ParticipantId> {
        if self.state != BallState::Held {
            return None;
        }

        self.state = BallState::Idle;
        self.transform.resume();
        self.owner.take()
    }

    pub fn bounce(&mut self, normal: Vec3) -> Bounce {
        self.direction = reflect(self.direction, normal).normalize();
        self.bounce_count += 1;
        self.buff.on_bounce(&mut self.tunables);

        let expired = self.bounce_count >= self.tunables.bounce_limit;
        let bounce = Bounce {
            normal,
            direction: self.direction,
            count: self.bounce_count,
            expired,
        };

        self.transform
            .set_velocity(self.direction * self.tunables.speed);
        if expired {
            self.expire();
        }
        bounce
    }

    /// Mirrors a bounce the authority reported
    pub fn mirror_bounce(&mut self, direction: Vec3, count: u32) {
        if self.state != BallState::Deadly {
            return;
        }

        self.direction = direction;
        self.bounce_count = count;
        self.buff.on_bounce(&mut self.tunables);
        if count >= self.tunables.bounce_limit {
            self.expire();
        }
    }

    /// Ends deadliness; no-op unless deadly
    pub fn expire(&mut self) {
        if self.state != BallState::Deadly {
            return;
        }

        self.state = BallState::Idle;
        self.owner = None;
        self.deadly_remaining = 0.0;
        self.buff.on_not_deadly(&mut self.tunables, &self.defaults);
        let velocity = self.transform.velocity();
        self.transform.set_velocity(velocity * SPENT_DAMPING);
    }

    /// Advances authoritative physics by one tick
    pub fn advance(&mut self, dt: f32, probe: &dyn MotionProbe, gravity: f32) -> Vec<ProjectileEvent> {
        let mut events = Vec::new();
        if !self.is_active() {
            return events;
        }

        match self.state {
            BallState::Deadly => self.advance_deadly(dt, probe, &mut events),
            BallState::Idle => self.advance_free(dt, probe, gravity),
            BallState::Held => {}
        }
        events
    }

    fn advance_deadly(&mut self, dt: f32, probe: &dyn MotionProbe, events: &mut Vec<ProjectileEvent>) {
        let step = self.tunables.speed * dt;
        let origin = self.transform.position();

        match probe.cast(origin, self.direction, step + self.radius) {
            Some(hit) => {
                let normal = hit.normal.normalize();
                self.transform
                    .set_position(hit.point + normal * self.radius);
                let bounce = self.bounce(normal);
                events.push(ProjectileEvent::Bounced(bounce));
                if bounce.expired {
                    events.push(ProjectileEvent::NotDeadly);
                    return;
                }
            }
            None => self
                .transform
                .set_position(origin + self.direction * step),
        }

        self.deadly_remaining -= dt;
        if self.deadly_remaining <= 0.0 {
            self.expire();
            events.push(ProjectileEvent::NotDeadly);
        }
    }

    fn advance_free(&mut self, dt: f32, probe: &dyn MotionProbe, gravity: f32) {
        let mut velocity = self.transform.velocity();
        velocity.y -= gravity * dt;

        let step = velocity * dt;
        let distance = step.magnitude();
        if distance <= EPSILON {
            return;
        }

        let origin = self.transform.position();
        match probe.cast(origin, step.normalize(), distance + self.radius) {
            Some(hit) => {
                let normal = hit.normal.normalize();
                self.transform
                    .set_position(hit.point + normal * self.radius);
                velocity = velocity - normal * velocity.dot(normal);
                if normal.y > 0.5 {
                    velocity = velocity * FLOOR_FRICTION;
                    if velocity.magnitude() < 0.05 {
                        velocity = Vec3::ZERO;
                    }
                }
            }
            None => self.transform.set_position(origin + step),
        }
        self.transform.set_velocity(velocity);
    }

    pub fn snapshot(&self) -> BallSnapshot {
        BallSnapshot {
            ball: self.id,
            membership: self.membership,
            state: self.state,
            owner: self.owner,
            direction: self.direction,
            bounce_count: self.bounce_count,
            tunables: self.tunables,
            buff: self.buff,
            deadly_remaining: self.deadly_remaining,
            transform: *self.transform.state(),
        }
    }

    /// Overwrites local state with the authority's, without blending
    pub fn apply_snapshot(&mut self, snapshot: &BallSnapshot) {
        self.membership = snapshot.membership;
        self.state = snapshot.state;
        self.owner = snapshot.owner;
        self.direction = snapshot.direction;
        self.bounce_count = snapshot.bounce_count;
        self.tunables = snapshot.tunables;
        self.buff = snapshot.buff;
        self.deadly_remaining = snapshot.deadly_remaining;
        self.transform.overwrite(snapshot.transform);
    }
}

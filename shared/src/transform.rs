//! Replicated transform state
//!
//! The authority publishes a change-set whenever the live state differs from
//! what it last published, and a full reconciliation snapshot every
//! `resync_interval` simulation-seconds regardless. Proxies apply what they
//! receive unless the entity is suspended (attached to another entity's frame).

use crate::math::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformState {
    pub position: Vec3,
    /// Euler angles in radians
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub suspended: bool,
}

impl TransformState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// What the authority publishes for one entity on one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformUpdate {
    Delta(TransformState),
    Reconcile(TransformState),
}

#[derive(Debug, Clone)]
pub struct ReplicatedTransform {
    state: TransformState,
    last_published: Option<TransformState>,
    kinematic: bool,
    force_update: bool,
    resync_interval: f32,
    since_resync: f32,
}

impl ReplicatedTransform {
    pub fn new(position: Vec3, resync_interval: f32) -> Self {
        Self {
            state: TransformState::at(position),
            last_published: None,
            kinematic: false,
            force_update: false,
            resync_interval,
            since_resync: 0.0,
        }
    }

    pub fn state(&self) -> &TransformState {
        &self.state
    }

    pub fn position(&self) -> Vec3 {
        self.state.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.state.position = position;
    }

    pub fn velocity(&self) -> Vec3 {
        self.state.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.state.velocity = velocity;
    }

    pub fn is_suspended(&self) -> bool {
        self.state.suspended
    }

    /// Attaches the entity to another entity's frame; the body goes kinematic
    pub fn suspend(&mut self) {
        self.state.suspended = true;
        self.kinematic = true;
        self.state.velocity = Vec3::ZERO;
        self.state.angular_velocity = Vec3::ZERO;
    }

    pub fn resume(&mut self) {
        self.state.suspended = false;
        self.kinematic = false;
    }

    /// Lets updates through while suspended, used during hand-offs
    pub fn set_force_update(&mut self, force: bool) {
        self.force_update = force;
    }

    /// Teleports the entity and clears motion
    pub fn reset(&mut self, position: Vec3) {
        self.state = TransformState::at(position);
        self.kinematic = false;
        self.force_update = false;
    }

    /// Replaces the whole state, bypassing suspension
    pub fn overwrite(&mut self, state: TransformState) {
        self.state = state;
        self.kinematic = state.suspended;
    }

    /// Authority side, called once per tick
    pub fn publish(&mut self, dt: f32) -> Option<TransformUpdate> {
        self.since_resync += dt;

        if self.since_resync >= self.resync_interval {
            self.since_resync = 0.0;
            self.last_published = Some(self.state);
            return Some(TransformUpdate::Reconcile(self.state));
        }

        if self.last_published != Some(self.state) {
            self.last_published = Some(self.state);
            return Some(TransformUpdate::Delta(self.state));
        }

        None
    }

    /// Forces the next `publish` to emit a reconciliation snapshot
    pub fn request_resync(&mut self) {
        self.since_resync = self.resync_interval;
    }

    /// Proxy side. Returns whether the update was applied.
    pub fn apply(&mut self, incoming: &TransformState) -> bool {
        if self.state.suspended && !self.force_update {
            return false;
        }

        self.state.position = incoming.position;
        self.state.rotation = incoming.rotation;
        if !self.kinematic {
            self.state.velocity = incoming.velocity;
            self.state.angular_velocity = incoming.angular_velocity;
        }
        self.state.suspended = incoming.suspended;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_publishes_only_changes() {
        let mut transform = ReplicatedTransform::new(Vec3::ZERO, 3.0);

        assert!(matches!(
            transform.publish(DT),
            Some(TransformUpdate::Delta(_))
        ));
        assert_eq!(transform.publish(DT), None);

        transform.set_position(Vec3::new(1.0, 0.0, 0.0));
        match transform.publish(DT) {
            Some(TransformUpdate::Delta(state)) => assert_approx_eq!(state.position.x, 1.0),
            other => panic!("Expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_forced_resync_every_interval() {
        let mut transform = ReplicatedTransform::new(Vec3::ZERO, 3.0);
        transform.publish(DT);

        let mut reconciles = 0;
        // 6.5 seconds of an entity at rest
        for _ in 0..390 {
            if let Some(TransformUpdate::Reconcile(_)) = transform.publish(DT) {
                reconciles += 1;
            }
        }
        assert_eq!(reconciles, 2);
    }

    #[test]
    fn test_proxy_ignores_updates_while_suspended() {
        let mut transform = ReplicatedTransform::new(Vec3::ZERO, 3.0);
        transform.suspend();

        let incoming = TransformState::at(Vec3::new(5.0, 0.0, 0.0));
        assert!(!transform.apply(&incoming));
        assert_eq!(transform.position(), Vec3::ZERO);

        transform.set_force_update(true);
        assert!(transform.apply(&incoming));
        assert_approx_eq!(transform.position().x, 5.0);
    }

    #[test]
    fn test_kinematic_body_keeps_its_velocity() {
        let mut transform = ReplicatedTransform::new(Vec3::ZERO, 3.0);
        // Held entities are kinematic; the override lets a hand-off through
        transform.suspend();
        transform.set_force_update(true);

        let mut incoming = TransformState::at(Vec3::new(1.0, 2.0, 3.0));
        incoming.velocity = Vec3::new(9.0, 0.0, 0.0);

        assert!(transform.apply(&incoming));
        assert_eq!(transform.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(transform.velocity(), Vec3::ZERO);
    }
}

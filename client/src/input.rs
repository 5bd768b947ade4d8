//! Scripted input for headless proxies
//!
//! The bot walks to the closest free projectile, picks it up and throws it at
//! the nearest living opponent. The action button is released between
//! presses so every press is a fresh edge.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{InputSnapshot, MatchPhase, ParticipantId, Session, Vec3};

pub struct BotInput {
    rng: StdRng,
    /// Ticks to wait before the next press
    hesitation: u32,
    pressed_last_tick: bool,
    wander: Vec3,
}

impl BotInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            hesitation: 0,
            pressed_last_tick: false,
            wander: Vec3::ZERO,
        }
    }

    fn nearest_opponent(session: &Session, me: ParticipantId, from: Vec3) -> Option<Vec3> {
        let world = session.world();
        world
            .avatars()
            .filter(|a| a.participant() != me && world.roster.is_alive(a.participant()))
            .map(|a| a.position())
            .min_by(|a, b| a.distance(from).total_cmp(&b.distance(from)))
    }

    fn press(&mut self) -> bool {
        if self.pressed_last_tick || self.hesitation > 0 {
            self.hesitation = self.hesitation.saturating_sub(1);
            self.pressed_last_tick = false;
            return false;
        }
        self.hesitation = self.rng.gen_range(5..30);
        self.pressed_last_tick = true;
        true
    }

    fn wander(&mut self) -> Vec3 {
        if self.wander.is_zero() || self.rng.gen_bool(0.02) {
            let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
            self.wander = Vec3::new(angle.cos(), 0.0, angle.sin());
        }
        self.wander
    }

    /// Samples the input for the session's local participant
    pub fn sample(&mut self, session: &Session) -> InputSnapshot {
        let me = session.local_id();
        let world = session.world();
        let Some(avatar) = world.avatar(me) else {
            return InputSnapshot::default();
        };
        if session.phase() != MatchPhase::Playing || !world.roster.is_alive(me) {
            return InputSnapshot::default();
        }

        let position = avatar.position();
        if avatar.held().is_some() {
            let Some(target) = Self::nearest_opponent(session, me, position) else {
                return InputSnapshot::default();
            };
            return InputSnapshot {
                aim_target: target + Vec3::UP,
                action: self.press(),
                movement: Vec3::ZERO,
            };
        }

        // Within pickup range
        if world.closest_free_ball(me).is_some() {
            return InputSnapshot {
                action: self.press(),
                ..InputSnapshot::default()
            };
        }

        let nearest_ball = world
            .pool
            .iter_active()
            .filter(|b| b.is_free() && !b.is_deadly())
            .map(|b| b.transform.position())
            .min_by(|a, b| a.distance(position).total_cmp(&b.distance(position)));

        let movement = match nearest_ball {
            Some(target) => (target - position).flatten().normalize(),
            None => self.wander(),
        };
        self.pressed_last_tick = false;
        InputSnapshot {
            movement,
            ..InputSnapshot::default()
        }
    }
}

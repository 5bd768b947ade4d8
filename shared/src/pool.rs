//! Bounded pool of pre-spawned projectiles
//!
//! Only the authority acquires and releases. Proxies keep a mirror of the same
//! lists, updated exclusively from replicated spawn, set-active and snapshot
//! events.

use crate::channel::{AuthorityChannel, Scope};
use crate::config::{PoolConfig, ProjectileConfig};
use crate::error::PoolError;
use crate::projectile::{BallSnapshot, Membership, Projectile, Tunables};
use crate::protocol::{BallId, Rpc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, VecDeque};

pub struct EntityPool {
    entities: BTreeMap<BallId, Projectile>,
    idle: VecDeque<BallId>,
    /// Front is the least recently activated
    active: VecDeque<BallId>,
    default_size: usize,
    max_size: usize,
    next_id: u32,
    defaults: Tunables,
    radius: f32,
    resync_interval: f32,
}

impl EntityPool {
    pub fn new(pool: &PoolConfig, projectile: &ProjectileConfig, resync_interval: f32) -> Self {
        Self {
            entities: BTreeMap::new(),
            idle: VecDeque::new(),
            active: VecDeque::new(),
            default_size: pool.default_size.min(pool.max_size),
            max_size: pool.max_size,
            next_id: 1,
            defaults: projectile.tunables(),
            radius: projectile.radius,
            resync_interval,
        }
    }

    /// Pre-spawns the default number of projectiles straight into the idle list
    pub fn warm(&mut self, channel: &mut AuthorityChannel) -> Result<(), PoolError> {
        while self.entities.len() < self.default_size {
            let id = self.instantiate(channel)?;
            self.idle.push_back(id);
        }
        info!(
            "Entity pool warmed with {} of {} projectiles",
            self.entities.len(),
            self.max_size
        );
        Ok(())
    }

    fn instantiate(&mut self, channel: &mut AuthorityChannel) -> Result<BallId, PoolError> {
        if !channel.is_authority() {
            return Err(PoolError::NotAuthority);
        }

        let id = BallId(self.next_id);
        self.next_id += 1;
        self.entities.insert(
            id,
            Projectile::new(id, self.defaults, self.radius, self.resync_interval),
        );
        channel.send(Scope::ToAllFromAuthority, Rpc::BallSpawned { ball: id });
        debug!("Instantiated {}", id);
        Ok(id)
    }

    /// Hands out a projectile, instantiating or recycling the oldest active one when starved
    pub fn acquire(&mut self, channel: &mut AuthorityChannel) -> Result<BallId, PoolError> {
        if !channel.is_authority() {
            return Err(PoolError::NotAuthority);
        }

        let id = if let Some(id) = self.idle.pop_front() {
            id
        } else if self.entities.len() < self.max_size {
            self.instantiate(channel)?
        } else if let Some(oldest) = self.active.front().copied() {
            debug!("Pool starved, recycling {}", oldest);
            self.release(oldest, channel);
            self.idle.pop_front().ok_or(PoolError::UnknownEntity(oldest))?
        } else {
            return Err(PoolError::ZeroCapacity);
        };

        let ball = self
            .entities
            .get_mut(&id)
            .ok_or(PoolError::UnknownEntity(id))?;
        ball.reset_to_defaults();
        ball.set_membership(Membership::Active);
        self.active.push_back(id);

        channel.send(
            Scope::ToAllFromAuthority,
            Rpc::SetActive {
                ball: id,
                active: true,
            },
        );
        Ok(id)
    }

    /// Returns a projectile to the idle list. No-op when it is already pooled.
    pub fn release(&mut self, id: BallId, channel: &mut AuthorityChannel) -> bool {
        if !channel.is_authority() {
            warn!("Ignoring release of {} outside the authority", id);
            return false;
        }

        let Some(index) = self.active.iter().position(|active| *active == id) else {
            return false;
        };
        self.active.remove(index);

        if let Some(ball) = self.entities.get_mut(&id) {
            ball.reset_to_defaults();
            ball.set_membership(Membership::Pooled);
        }
        self.idle.push_back(id);

        channel.send(
            Scope::ToAllFromAuthority,
            Rpc::SetActive {
                ball: id,
                active: false,
            },
        );
        true
    }

    pub fn release_all(&mut self, channel: &mut AuthorityChannel) -> usize {
        let active: Vec<BallId> = self.active.iter().copied().collect();
        active
            .into_iter()
            .filter(|id| self.release(*id, channel))
            .count()
    }

    pub fn get(&self, id: BallId) -> Option<&Projectile> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: BallId) -> Option<&mut Projectile> {
        self.entities.get_mut(&id)
    }

    /// Active projectiles, oldest activation first
    pub fn active_ids(&self) -> Vec<BallId> {
        self.active.iter().copied().collect()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Projectile> {
        self.active.iter().filter_map(|id| self.entities.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Projectile> {
        self.entities.values()
    }

    pub fn pooled_count(&self) -> usize {
        self.idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn total_created(&self) -> usize {
        self.entities.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_active(&self, id: BallId) -> bool {
        self.active.contains(&id)
    }

    /// Proxy mirror of a spawn announcement
    pub fn mirror_spawn(&mut self, id: BallId) {
        if self.entities.contains_key(&id) {
            return;
        }
        self.entities.insert(
            id,
            Projectile::new(id, self.defaults, self.radius, self.resync_interval),
        );
        self.idle.push_back(id);
    }

    /// Proxy mirror of a set-active announcement
    pub fn mirror_set_active(&mut self, id: BallId, active: bool) {
        self.mirror_spawn(id);
        self.move_to(id, if active { Membership::Active } else { Membership::Pooled });

        if let Some(ball) = self.entities.get_mut(&id) {
            ball.reset_to_defaults();
            ball.set_membership(if active {
                Membership::Active
            } else {
                Membership::Pooled
            });
        }
    }

    /// Proxy mirror of a full projectile snapshot
    pub fn mirror_snapshot(&mut self, snapshot: &BallSnapshot) {
        self.mirror_spawn(snapshot.ball);
        self.move_to(snapshot.ball, snapshot.membership);

        if let Some(ball) = self.entities.get_mut(&snapshot.ball) {
            ball.apply_snapshot(snapshot);
        }
    }

    fn move_to(&mut self, id: BallId, membership: Membership) {
        let (from, to) = match membership {
            Membership::Active => (&mut self.idle, &mut self.active),
            Membership::Pooled => (&mut self.active, &mut self.idle),
        };

        if let Some(index) = from.iter().position(|other| *other == id) {
            from.remove(index);
            to.push_back(id);
        }
    }
}

//! Projectile buffs rolled when a projectile is acquired from the pool

use crate::projectile::Tunables;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum BuffKind {
    #[default]
    Plain,
    /// Speeds up on every bounce until `max_speed`
    Speed {
        increase: f32,
        max_speed: f32,
        bounce_limit: u32,
    },
    /// Explodes on its first bounce
    Bomb,
    /// Grows while deadly
    Giant { scale: f32 },
}

impl BuffKind {
    pub fn title(&self) -> &'static str {
        match self {
            BuffKind::Plain => "plain",
            BuffKind::Speed { .. } => "speed",
            BuffKind::Bomb => "bomb",
            BuffKind::Giant { .. } => "giant",
        }
    }

    pub fn on_spawn(&self, tunables: &mut Tunables) {
        match *self {
            BuffKind::Speed { bounce_limit, .. } => tunables.bounce_limit = bounce_limit,
            BuffKind::Bomb => tunables.bounce_limit = 1,
            BuffKind::Plain | BuffKind::Giant { .. } => {}
        }
    }

    pub fn on_bounce(&self, tunables: &mut Tunables) {
        if let BuffKind::Speed {
            increase,
            max_speed,
            ..
        } = *self
        {
            tunables.speed = (tunables.speed + increase).min(max_speed);
        }
    }

    pub fn on_not_deadly(&self, tunables: &mut Tunables, defaults: &Tunables) {
        if let BuffKind::Speed { .. } = self {
            tunables.speed = defaults.speed;
        }
    }

    /// Whether a bounce of this projectile is presented as an explosion
    pub fn explodes_on_bounce(&self) -> bool {
        matches!(self, BuffKind::Bomb)
    }

    /// Visual scale while deadly
    pub fn deadly_scale(&self) -> f32 {
        match *self {
            BuffKind::Giant { scale } => scale,
            _ => 1.0,
        }
    }
}

/// Relative chance of a buff being rolled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuffChance {
    pub buff: BuffKind,
    pub chance: u32,
}

pub fn default_buff_chances() -> Vec<BuffChance> {
    vec![
        BuffChance {
            buff: BuffKind::Plain,
            chance: 10,
        },
        BuffChance {
            buff: BuffKind::Speed {
                increase: 4.0,
                max_speed: 40.0,
                bounce_limit: 5,
            },
            chance: 2,
        },
        BuffChance {
            buff: BuffKind::Bomb,
            chance: 1,
        },
        BuffChance {
            buff: BuffKind::Giant { scale: 2.0 },
            chance: 1,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct BuffTable {
    entries: Vec<BuffChance>,
    total: u32,
}

impl BuffTable {
    pub fn new(chances: &[BuffChance]) -> Self {
        let entries: Vec<BuffChance> = chances.iter().filter(|c| c.chance > 0).copied().collect();
        let total = entries.iter().map(|c| c.chance).sum();
        Self { entries, total }
    }

    /// Picks a buff proportionally to its chance; plain when the table is empty
    pub fn roll<R: Rng>(&self, rng: &mut R) -> BuffKind {
        if self.total == 0 {
            return BuffKind::Plain;
        }

        let mut roll = rng.gen_range(0..self.total);
        for entry in &self.entries {
            if roll < entry.chance {
                return entry.buff;
            }
            roll -= entry.chance;
        }
        BuffKind::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tunables() -> Tunables {
        Tunables {
            speed: 20.0,
            deadly_duration: 3.0,
            bounce_limit: 3,
        }
    }

    #[test]
    fn test_speed_buff_caps_and_restores() {
        let buff = BuffKind::Speed {
            increase: 15.0,
            max_speed: 40.0,
            bounce_limit: 6,
        };
        let defaults = tunables();
        let mut live = defaults;

        buff.on_spawn(&mut live);
        assert_eq!(live.bounce_limit, 6);

        buff.on_bounce(&mut live);
        assert_approx_eq!(live.speed, 35.0);
        buff.on_bounce(&mut live);
        assert_approx_eq!(live.speed, 40.0);

        buff.on_not_deadly(&mut live, &defaults);
        assert_approx_eq!(live.speed, 20.0);
    }

    #[test]
    fn test_bomb_bounces_once() {
        let mut live = tunables();
        BuffKind::Bomb.on_spawn(&mut live);
        assert_eq!(live.bounce_limit, 1);
        assert!(BuffKind::Bomb.explodes_on_bounce());
    }

    #[test]
    fn test_table_only_rolls_weighted_entries() {
        let table = BuffTable::new(&[
            BuffChance {
                buff: BuffKind::Bomb,
                chance: 1,
            },
            BuffChance {
                buff: BuffKind::Plain,
                chance: 0,
            },
        ]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            assert_eq!(table.roll(&mut rng), BuffKind::Bomb);
        }
    }

    #[test]
    fn test_empty_table_rolls_plain() {
        let table = BuffTable::new(&[]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(table.roll(&mut rng), BuffKind::Plain);
    }
}

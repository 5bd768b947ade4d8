//! Weighted level selection without replacement

use crate::protocol::LevelId;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelEntry {
    pub id: LevelId,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Picks levels from a draw pool that refills when exhausted or, on any pick,
/// with probability `refresh_chance` so repeats stay possible
#[derive(Debug, Clone)]
pub struct LevelPicker {
    levels: Vec<LevelEntry>,
    remaining: Vec<LevelEntry>,
    refresh_chance: f32,
    history: Vec<LevelId>,
}

impl LevelPicker {
    pub fn new(levels: &[LevelEntry], refresh_chance: f32) -> Self {
        Self {
            levels: levels.to_vec(),
            remaining: levels.to_vec(),
            refresh_chance,
            history: Vec::new(),
        }
    }

    pub fn pick<R: Rng>(&mut self, rng: &mut R) -> Option<LevelId> {
        if self.levels.is_empty() {
            return None;
        }

        if self.remaining.is_empty() || rng.gen::<f32>() < self.refresh_chance {
            debug!("Refreshing level pool");
            self.remaining = self.levels.clone();
        }

        let total: u32 = self.remaining.iter().map(|l| l.weight.max(1)).sum();
        let mut roll = rng.gen_range(0..total);
        let mut index = self.remaining.len() - 1;
        for (i, entry) in self.remaining.iter().enumerate() {
            let weight = entry.weight.max(1);
            if roll < weight {
                index = i;
                break;
            }
            roll -= weight;
        }

        let picked = self.remaining.remove(index).id;
        self.history.push(picked);
        Some(picked)
    }

    pub fn contains(&self, level: LevelId) -> bool {
        self.levels.iter().any(|l| l.id == level)
    }

    pub fn history(&self) -> &[LevelId] {
        &self.history
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

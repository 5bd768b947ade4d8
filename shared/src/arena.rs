//! Stand-in collaborators for headless sessions: a box arena, random spawn
//! points inside it and a scene loader that takes a fixed time per level

use crate::collaborators::{Bounds, MotionProbe, SceneLoader, SpawnGeometry, SurfaceHit};
use crate::math::{Vec3, EPSILON};
use crate::protocol::LevelId;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Axis-aligned box whose inner faces are the only surfaces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaGeometry {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for ArenaGeometry {
    fn default() -> Self {
        Self {
            min: Vec3::new(-15.0, 0.0, -15.0),
            max: Vec3::new(15.0, 10.0, 15.0),
        }
    }
}

impl MotionProbe for ArenaGeometry {
    fn cast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<SurfaceHit> {
        let axes = [
            (direction.x, origin.x, self.min.x, self.max.x, Vec3::new(1.0, 0.0, 0.0)),
            (direction.y, origin.y, self.min.y, self.max.y, Vec3::new(0.0, 1.0, 0.0)),
            (direction.z, origin.z, self.min.z, self.max.z, Vec3::new(0.0, 0.0, 1.0)),
        ];

        let mut nearest: Option<(f32, Vec3)> = None;
        for (d, o, min, max, axis) in axes {
            if d.abs() <= EPSILON {
                continue;
            }
            // Moving towards +axis hits the max face, whose normal points back inside
            let (t, normal) = if d > 0.0 {
                ((max - o) / d, -axis)
            } else {
                ((min - o) / d, axis)
            };
            let t = t.max(0.0);
            if nearest.map_or(true, |(best, _)| t < best) {
                nearest = Some((t, normal));
            }
        }

        let (distance, normal) = nearest?;
        (distance <= max_distance).then(|| SurfaceHit {
            point: origin + direction * distance,
            normal,
            distance,
        })
    }
}

/// Random ground-level spawn points inside an arena
pub struct ArenaSpawner {
    arena: ArenaGeometry,
    rng: StdRng,
}

impl ArenaSpawner {
    pub fn new(arena: ArenaGeometry, seed: u64) -> Self {
        Self {
            arena,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn random_between(&mut self, min: f32, max: f32) -> f32 {
        if max <= min {
            return (min + max) / 2.0;
        }
        self.rng.gen_range(min..max)
    }
}

impl SpawnGeometry for ArenaSpawner {
    fn spawn_point(&mut self) -> Vec3 {
        self.spawn_point_within(Bounds {
            half_extents: Vec3::ZERO,
        })
    }

    fn spawn_point_within(&mut self, bounds: Bounds) -> Vec3 {
        let half = bounds.half_extents;
        let (min, max) = (self.arena.min, self.arena.max);
        let x = self.random_between(min.x + half.x, max.x - half.x);
        let z = self.random_between(min.z + half.z, max.z - half.z);
        Vec3::new(x, min.y + half.y, z)
    }
}

/// Scene loader that finishes a level load after `load_time` simulation-seconds
#[derive(Debug, Clone, Default)]
pub struct TimedScene {
    load_time: f32,
    current: Option<LevelId>,
    loading: Option<(LevelId, f32)>,
}

impl TimedScene {
    pub fn new(load_time: f32) -> Self {
        Self {
            load_time,
            ..Self::default()
        }
    }

    pub fn current(&self) -> Option<LevelId> {
        self.current
    }
}

impl SceneLoader for TimedScene {
    fn load_level(&mut self, level: LevelId) {
        debug!("Loading level {}", level);
        if self.load_time <= 0.0 {
            self.current = Some(level);
            self.loading = None;
        } else {
            self.loading = Some((level, self.load_time));
        }
    }

    fn is_loaded(&self) -> bool {
        self.loading.is_none()
    }

    fn tick(&mut self, dt: f32) {
        if let Some((level, remaining)) = self.loading.as_mut() {
            *remaining -= dt;
            if *remaining <= 0.0 {
                self.current = Some(*level);
                self.loading = None;
            }
        }
    }
}

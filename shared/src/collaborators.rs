//! Narrow interfaces to the systems the core does not own
//!
//! Scene loading, spawn geometry, collision probing, presentation and input
//! capture live outside the core. A session talks to them only through the
//! traits and plain data types in this module.

use crate::math::Vec3;
use crate::protocol::{BallId, LevelId, ParticipantId};
use log::{debug, info};
use std::sync::{Arc, Mutex};

/// Surface contact reported by a motion probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

pub trait MotionProbe {
    /// Casts from `origin` along `direction` up to `max_distance`
    fn cast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<SurfaceHit>;
}

pub trait SceneLoader {
    /// Starts loading a level; completion is observed through `is_loaded`
    fn load_level(&mut self, level: LevelId);

    fn is_loaded(&self) -> bool;

    /// Advances any in-progress load by one simulation tick
    fn tick(&mut self, _dt: f32) {}
}

/// Half extents of an entity that must fit at a spawn point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub half_extents: Vec3,
}

pub trait SpawnGeometry {
    fn spawn_point(&mut self) -> Vec3;

    /// Ground-adjusted spawn point for an entity of the given size
    fn spawn_point_within(&mut self, bounds: Bounds) -> Vec3;
}

/// One-way notifications for audio, effects, animation and UI
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    ParticipantJoined {
        participant: ParticipantId,
        slot: u8,
    },
    ParticipantLeft {
        participant: ParticipantId,
    },
    BallPickedUp {
        ball: BallId,
        by: ParticipantId,
    },
    BallThrown {
        ball: BallId,
        by: ParticipantId,
        direction: Vec3,
        scale: f32,
    },
    BallBounced {
        ball: BallId,
        normal: Vec3,
        direction: Vec3,
        count: u32,
        explosion: bool,
    },
    BallDropped {
        ball: BallId,
        by: ParticipantId,
    },
    BallNotDeadly {
        ball: BallId,
    },
    ParticipantEliminated {
        participant: ParticipantId,
        ball: BallId,
    },
    WinnerDeclared {
        winner: ParticipantId,
        color: &'static str,
    },
    LevelEntered {
        level: LevelId,
    },
}

pub trait Presentation {
    fn notify(&mut self, event: &GameEvent);
}

/// Presentation that ignores every notification
#[derive(Debug, Default)]
pub struct Silent;

impl Presentation for Silent {
    fn notify(&mut self, _event: &GameEvent) {}
}

/// Presentation that writes every notification to the log
#[derive(Debug, Clone)]
pub struct LogPresentation {
    label: String,
}

impl LogPresentation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Presentation for LogPresentation {
    fn notify(&mut self, event: &GameEvent) {
        match event {
            GameEvent::WinnerDeclared { winner, color } => {
                info!("[{}] {} wins as {}", self.label, winner, color)
            }
            GameEvent::LevelEntered { level } => info!("[{}] entered level {}", self.label, level),
            GameEvent::ParticipantEliminated { participant, ball } => {
                info!("[{}] {} eliminated by {}", self.label, participant, ball)
            }
            other => debug!("[{}] {:?}", self.label, other),
        }
    }
}

/// Presentation that records notifications into a shared log
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<GameEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GameEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, predicate: impl Fn(&GameEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl Presentation for EventLog {
    fn notify(&mut self, event: &GameEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Per-tick sample from the input collaborator
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSnapshot {
    pub aim_target: Vec3,
    /// Raw level of the throw/pickup button
    pub action: bool,
    pub movement: Vec3,
}

/// Turns a held button into one action per press
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionEdge {
    already_pressed: bool,
}

impl ActionEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only on the tick the button goes down
    pub fn press(&mut self, held: bool) -> bool {
        let fired = held && !self.already_pressed;
        self.already_pressed = held;
        fired
    }
}

//! Match lifecycle: lobby, level transitions with a load barrier, play and the win sequence
//!
//! The lifecycle never touches the world or the network directly. Each call
//! returns [`LifecycleAction`]s that the session carries out, which keeps the
//! state machine testable on its own.

use crate::channel::{RoleKind, Scope};
use crate::collaborators::GameEvent;
use crate::config::MatchConfig;
use crate::error::LifecycleError;
use crate::level::LevelPicker;
use crate::protocol::{LevelId, ParticipantId, Rpc};
use crate::task::{Countdown, PollTimer, TaskSlot};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchPhase {
    #[default]
    Lobby,
    LevelLoading,
    Playing,
    WinSequence,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchState {
    pub phase: MatchPhase,
    pub level: Option<LevelId>,
    /// Participants that signalled a completed load during the current transition
    ready: BTreeSet<ParticipantId>,
}

impl MatchState {
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    Broadcast { scope: Scope, rpc: Rpc },
    LoadLevel(LevelId),
    /// Release projectiles, seed new ones, reset roster and respawn avatars
    ResetLevel,
    /// Proxy-side roster reset once the authority releases everyone
    ResetRoster,
    Notify(GameEvent),
}

/// What the lifecycle needs to know about the rest of the session each tick
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub participant_count: usize,
    pub scene_loaded: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Exit(Countdown),
    AwaitLocalLoad(PollTimer),
    AwaitBarrier(PollTimer),
    AwaitEnterSignal(PollTimer),
    Enter(Countdown),
}

#[derive(Debug)]
struct LevelTransition {
    level: LevelId,
    stage: Stage,
}

#[derive(Debug, Clone, PartialEq)]
enum WinStage {
    Linger(Countdown),
    Exit(Countdown),
    Enter(Countdown),
    Display(Countdown),
}

#[derive(Debug)]
struct WinSequence {
    winner: ParticipantId,
    stage: WinStage,
}

pub struct MatchLifecycle {
    role: RoleKind,
    config: MatchConfig,
    state: MatchState,
    picker: LevelPicker,
    transition: TaskSlot<LevelTransition>,
    win: TaskSlot<WinSequence>,
    enter_released: bool,
    /// Entered through a late-join catch-up; the roster mirror is already current
    joined_late: bool,
}

impl MatchLifecycle {
    pub fn new(role: RoleKind, config: &MatchConfig) -> Self {
        Self {
            role,
            config: config.clone(),
            state: MatchState::default(),
            picker: LevelPicker::new(&config.levels, config.refresh_chance),
            transition: TaskSlot::new("level transition"),
            win: TaskSlot::new("win"),
            enter_released: false,
            joined_late: false,
        }
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    pub fn level(&self) -> Option<LevelId> {
        self.state.level
    }

    pub fn picker(&self) -> &LevelPicker {
        &self.picker
    }

    pub fn is_transition_running(&self) -> bool {
        self.transition.is_running()
    }

    pub fn is_win_running(&self) -> bool {
        self.win.is_running()
    }

    pub fn winner(&self) -> Option<ParticipantId> {
        self.win.get().map(|w| w.winner)
    }

    fn is_authority(&self) -> bool {
        self.role == RoleKind::Authority
    }

    /// Leaves the lobby with a freshly picked level
    pub fn start_match<R: Rng>(&mut self, rng: &mut R) -> Result<Vec<LifecycleAction>, LifecycleError> {
        if !self.is_authority() {
            return Err(LifecycleError::NotAuthority);
        }
        if self.state.phase != MatchPhase::Lobby {
            return Ok(Vec::new());
        }

        let level = self.picker.pick(rng).ok_or(LifecycleError::NoLevels)?;
        self.go_to_level(level)
    }

    /// Authority entry point for a level change; ignored while one is running
    pub fn go_to_level(&mut self, level: LevelId) -> Result<Vec<LifecycleAction>, LifecycleError> {
        if !self.is_authority() {
            return Err(LifecycleError::NotAuthority);
        }
        if !self.picker.contains(level) {
            return Err(LifecycleError::UnknownLevel(level));
        }
        if self.transition.is_running() {
            debug!("Level transition already running, ignoring level {}", level);
            return Ok(Vec::new());
        }

        Ok(self.begin_transition(level))
    }

    /// Proxy side of a level change ordered by the authority
    pub fn follow_level(&mut self, level: LevelId) -> Vec<LifecycleAction> {
        if self.is_authority() {
            return Vec::new();
        }
        self.begin_transition(level)
    }

    /// Brings a proxy that joined mid-match into the current level
    pub fn sync_late_join(&mut self, phase: MatchPhase, level: Option<LevelId>) -> Vec<LifecycleAction> {
        if self.is_authority() || self.state.phase != MatchPhase::Lobby {
            return Vec::new();
        }

        match (phase, level) {
            (MatchPhase::LevelLoading, Some(level)) => self.follow_level(level),
            (MatchPhase::Playing | MatchPhase::WinSequence, Some(level)) => {
                let actions = self.follow_level(level);
                // The authority already released everyone into this level
                self.enter_released = true;
                self.joined_late = true;
                actions
            }
            _ => Vec::new(),
        }
    }

    fn begin_transition(&mut self, level: LevelId) -> Vec<LifecycleAction> {
        self.win.cancel();
        self.state.phase = MatchPhase::LevelLoading;
        self.state.level = Some(level);
        self.state.ready.clear();
        self.enter_released = false;
        self.joined_late = false;

        let exit = self.config.exit_duration + self.config.wait_between_transitions;
        self.transition.start(LevelTransition {
            level,
            stage: Stage::Exit(Countdown::new(exit)),
        });
        info!("Transitioning to level {}", level);

        let mut actions = Vec::new();
        if self.is_authority() {
            actions.push(LifecycleAction::Broadcast {
                scope: Scope::ToAllFromAuthority,
                rpc: Rpc::GoToLevel { level },
            });
        }
        actions
    }

    /// Authority bookkeeping of a participant's "loaded" signal
    pub fn record_loaded(&mut self, participant: ParticipantId) {
        if !self.is_authority() || self.state.phase != MatchPhase::LevelLoading {
            debug!("Ignoring load signal from {}", participant);
            return;
        }
        self.state.ready.insert(participant);
    }

    /// Proxy side of the authority's "enter" signal
    pub fn release_enter(&mut self) {
        if self.transition.is_running() {
            self.enter_released = true;
        }
    }

    /// Drops a departed participant's load signal and re-evaluates the barrier
    pub fn participant_departed(
        &mut self,
        participant: ParticipantId,
        participant_count: usize,
    ) -> Vec<LifecycleAction> {
        self.state.ready.remove(&participant);

        let awaiting = matches!(
            self.transition.get().map(|t| &t.stage),
            Some(Stage::AwaitBarrier(_))
        );
        let mut actions = Vec::new();
        if awaiting && self.state.ready.len() >= participant_count {
            if let Some(transition) = self.transition.get_mut() {
                transition.stage = Stage::Enter(Countdown::new(self.config.enter_duration));
            }
            self.close_barrier(&mut actions);
        }
        actions
    }

    fn close_barrier(&mut self, actions: &mut Vec<LifecycleAction>) {
        info!(
            "Load barrier closed with {} participants ready",
            self.state.ready.len()
        );
        self.state.ready.clear();
        actions.push(LifecycleAction::Broadcast {
            scope: Scope::ToAllFromAuthority,
            rpc: Rpc::EnterLevel,
        });
    }

    /// Starts the win sequence; ignored outside play or while one is running
    pub fn declare_winner(&mut self, winner: ParticipantId) -> Vec<LifecycleAction> {
        if self.win.is_running() || self.state.phase != MatchPhase::Playing {
            debug!("Ignoring winner {} in {:?}", winner, self.state.phase);
            return Vec::new();
        }

        self.state.phase = MatchPhase::WinSequence;
        self.win.start(WinSequence {
            winner,
            stage: WinStage::Linger(Countdown::new(self.config.wait_before_win)),
        });
        info!("Participant {} wins the round", winner);

        let mut actions = Vec::new();
        if self.is_authority() {
            actions.push(LifecycleAction::Broadcast {
                scope: Scope::ToAllFromAuthority,
                rpc: Rpc::DeclareWinner { winner },
            });
        }
        actions
    }

    /// Advances every in-flight sequence by one tick
    pub fn tick<R: Rng>(&mut self, dt: f32, context: &TickContext, rng: &mut R) -> Vec<LifecycleAction> {
        let mut actions = Vec::new();
        self.advance_transition(dt, context, &mut actions);
        self.advance_win(dt, rng, &mut actions);
        actions
    }

    fn advance_transition(&mut self, dt: f32, context: &TickContext, actions: &mut Vec<LifecycleAction>) {
        let authority = self.is_authority();
        let interval = self.config.load_check_interval;
        let enter = self.config.enter_duration;
        let ready = self.state.ready.len();
        let released = self.enter_released;
        let joined_late = self.joined_late;

        let Some(transition) = self.transition.get_mut() else {
            return;
        };
        let level = transition.level;

        let mut barrier_closed = false;
        let mut entered = false;
        let mut finished = false;

        let next = match &mut transition.stage {
            Stage::Exit(countdown) => {
                if countdown.tick(dt) {
                    actions.push(LifecycleAction::LoadLevel(level));
                    Some(Stage::AwaitLocalLoad(PollTimer::new(interval)))
                } else {
                    None
                }
            }
            Stage::AwaitLocalLoad(poll) => {
                if poll.due(dt) && context.scene_loaded {
                    actions.push(LifecycleAction::Broadcast {
                        scope: Scope::ToAuthority,
                        rpc: Rpc::ClientLoaded,
                    });
                    if authority {
                        actions.push(LifecycleAction::ResetLevel);
                        Some(Stage::AwaitBarrier(PollTimer::new(interval)))
                    } else {
                        Some(Stage::AwaitEnterSignal(PollTimer::new(interval)))
                    }
                } else {
                    None
                }
            }
            Stage::AwaitBarrier(poll) => {
                if poll.due(dt) && ready >= context.participant_count {
                    barrier_closed = true;
                    Some(Stage::Enter(Countdown::new(enter)))
                } else {
                    None
                }
            }
            Stage::AwaitEnterSignal(poll) => {
                if poll.due(dt) && released {
                    entered = true;
                    if !joined_late {
                        actions.push(LifecycleAction::ResetRoster);
                    }
                    Some(Stage::Enter(Countdown::new(enter)))
                } else {
                    None
                }
            }
            Stage::Enter(countdown) => {
                finished = countdown.tick(dt);
                None
            }
        };

        if let Some(stage) = next {
            transition.stage = stage;
        }

        if barrier_closed {
            self.close_barrier(actions);
        }
        if entered {
            self.enter_released = false;
            self.joined_late = false;
        }
        if finished {
            self.transition.cancel();
            self.state.phase = MatchPhase::Playing;
            info!("Entered level {}", level);
            actions.push(LifecycleAction::Notify(GameEvent::LevelEntered { level }));
        }
    }

    fn advance_win<R: Rng>(&mut self, dt: f32, rng: &mut R, actions: &mut Vec<LifecycleAction>) {
        let exit = self.config.exit_duration + self.config.wait_between_transitions;
        let enter = self.config.enter_duration;
        let display = self.config.win_screen_duration;

        let Some(sequence) = self.win.get_mut() else {
            return;
        };

        let mut done = false;
        let next = match &mut sequence.stage {
            WinStage::Linger(countdown) => countdown
                .tick(dt)
                .then(|| WinStage::Exit(Countdown::new(exit))),
            WinStage::Exit(countdown) => countdown
                .tick(dt)
                .then(|| WinStage::Enter(Countdown::new(enter))),
            WinStage::Enter(countdown) => countdown
                .tick(dt)
                .then(|| WinStage::Display(Countdown::new(display))),
            WinStage::Display(countdown) => {
                done = countdown.tick(dt);
                None
            }
        };

        if let Some(stage) = next {
            sequence.stage = stage;
        }

        if done {
            self.win.cancel();
            if self.is_authority() {
                match self.picker.pick(rng) {
                    Some(level) => actions.extend(self.begin_transition(level)),
                    None => warn!("No level to continue with after the win sequence"),
                }
            }
        }
    }
}

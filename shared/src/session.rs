//! One participant's view of a match
//!
//! A session owns every manager explicitly: the channel, the world (pool,
//! roster, avatars), the lifecycle and the collaborators. Transports feed it
//! join/leave notifications and envelopes, drain its outgoing envelopes and
//! call [`Session::tick`] at the fixed tick rate. The per-tick order is input
//! intake, simulation, lifecycle, transform replication, event delivery.

use crate::arena::{ArenaGeometry, ArenaSpawner, TimedScene};
use crate::buff::BuffTable;
use crate::channel::{AuthorityChannel, Envelope, Outgoing, RoleKind, Scope};
use crate::collaborators::{
    ActionEdge, Bounds, GameEvent, InputSnapshot, MotionProbe, Presentation, SceneLoader,
    SpawnGeometry,
};
use crate::command::{Command, CommandOutcome};
use crate::config::SessionConfig;
use crate::error::{LifecycleError, SessionError};
use crate::lifecycle::{LifecycleAction, MatchLifecycle, MatchPhase, TickContext};
use crate::math::Vec3;
use crate::protocol::{BallId, EntityRef, LevelId, ParticipantId, Rpc, HOST_PARTICIPANT};
use crate::role::{strategy_for, RoleContext, RoleStrategy};
use crate::world::World;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// The external systems a session talks to
pub struct Collaborators {
    pub scene: Box<dyn SceneLoader + Send + Sync>,
    pub spawns: Box<dyn SpawnGeometry + Send + Sync>,
    pub probe: Box<dyn MotionProbe + Send + Sync>,
    pub presentation: Box<dyn Presentation + Send + Sync>,
}

impl Collaborators {
    /// Box arena, random spawns and a scene that loads in `load_time` seconds
    pub fn headless(seed: u64, load_time: f32, presentation: Box<dyn Presentation + Send + Sync>) -> Self {
        let arena = ArenaGeometry::default();
        Self {
            scene: Box::new(TimedScene::new(load_time)),
            spawns: Box::new(ArenaSpawner::new(arena, seed)),
            probe: Box::new(arena),
            presentation,
        }
    }
}

/// Payloads that only the authority may originate
fn requires_authority(payload: &Rpc) -> bool {
    !matches!(
        payload,
        Rpc::Request(_) | Rpc::AvatarMove { .. } | Rpc::ClientLoaded
    )
}

pub struct Session {
    config: SessionConfig,
    channel: AuthorityChannel,
    role: Box<dyn RoleStrategy>,
    world: World,
    lifecycle: MatchLifecycle,
    collaborators: Collaborators,
    buffs: BuffTable,
    rng: StdRng,
    action: ActionEdge,
    ticks: u64,
}

impl Session {
    fn new(
        kind: RoleKind,
        local_id: ParticipantId,
        config: SessionConfig,
        collaborators: Collaborators,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            channel: AuthorityChannel::new(kind, local_id),
            role: strategy_for(kind),
            world: World::new(&config),
            lifecycle: MatchLifecycle::new(kind, &config.lifecycle),
            buffs: BuffTable::new(&config.buffs),
            collaborators,
            rng,
            action: ActionEdge::new(),
            ticks: 0,
            config,
        }
    }

    /// Authority session; warms the pool and registers the hosting participant
    pub fn host(config: SessionConfig, collaborators: Collaborators) -> Result<Self, SessionError> {
        let mut session = Self::new(RoleKind::Authority, HOST_PARTICIPANT, config, collaborators);
        session.world.pool.warm(&mut session.channel)?;
        session.participant_joined(HOST_PARTICIPANT)?;
        Ok(session)
    }

    /// Proxy session for a participant id assigned by the authority
    pub fn proxy(local_id: ParticipantId, config: SessionConfig, collaborators: Collaborators) -> Self {
        Self::new(RoleKind::Proxy, local_id, config, collaborators)
    }

    pub fn local_id(&self) -> ParticipantId {
        self.channel.local_id()
    }

    pub fn role(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn is_authority(&self) -> bool {
        self.channel.is_authority()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn lifecycle(&self) -> &MatchLifecycle {
        &self.lifecycle
    }

    pub fn phase(&self) -> MatchPhase {
        self.lifecycle.phase()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn with_role<T>(&mut self, f: impl FnOnce(&mut dyn RoleStrategy, &mut RoleContext) -> T) -> T {
        let mut ctx = RoleContext {
            world: &mut self.world,
            channel: &mut self.channel,
            probe: &*self.collaborators.probe,
            phase: self.lifecycle.phase(),
        };
        f(self.role.as_mut(), &mut ctx)
    }

    fn notify(&mut self, event: &GameEvent) {
        self.collaborators.presentation.notify(event);
    }

    fn avatar_bounds(&self) -> Bounds {
        let radius = self.config.avatar.radius;
        Bounds {
            half_extents: Vec3::new(radius, 0.0, radius),
        }
    }

    fn ball_bounds(&self) -> Bounds {
        let radius = self.config.projectile.radius;
        Bounds {
            half_extents: Vec3::new(radius, radius, radius),
        }
    }

    /// Transport notification that a participant joined (authority only)
    pub fn participant_joined(&mut self, participant: ParticipantId) -> Result<(), SessionError> {
        if !self.is_authority() {
            warn!("Proxy {} ignoring join of {}", self.local_id(), participant);
            return Ok(());
        }

        let slot = self.world.roster.add_participant(participant)?;
        let bounds = self.avatar_bounds();
        let spawn = self.collaborators.spawns.spawn_point_within(bounds);
        self.world.spawn_avatar(participant, spawn);
        self.notify(&GameEvent::ParticipantJoined { participant, slot });

        self.broadcast_world();
        self.maybe_auto_start()?;
        Ok(())
    }

    /// Sends the roster, every projectile and the match state so a newcomer can catch up
    fn broadcast_world(&mut self) {
        let mut messages: Vec<Rpc> = self
            .world
            .roster
            .iter()
            .map(|p| Rpc::ParticipantJoined {
                participant: p.id,
                slot: p.slot,
                alive: p.is_alive(),
            })
            .collect();

        for ball in self.world.pool.iter() {
            messages.push(Rpc::BallSpawned { ball: ball.id() });
            messages.push(Rpc::BallSync(ball.snapshot()));
        }
        messages.push(Rpc::MatchSync {
            phase: self.lifecycle.phase(),
            level: self.lifecycle.level(),
        });

        for avatar in self.world.avatars_mut() {
            avatar.transform.request_resync();
        }
        for rpc in messages {
            self.channel.send(Scope::ToAllFromAuthority, rpc);
        }
    }

    fn maybe_auto_start(&mut self) -> Result<(), LifecycleError> {
        let threshold = self.config.lifecycle.auto_start_players;
        if threshold > 0
            && self.lifecycle.phase() == MatchPhase::Lobby
            && self.world.roster.len() >= threshold
        {
            info!("{} participants present, starting the match", threshold);
            self.start_match()?;
        }
        Ok(())
    }

    /// Transport notification that a participant left (authority only)
    pub fn participant_left(&mut self, participant: ParticipantId) {
        if !self.is_authority() || !self.world.roster.contains(participant) {
            return;
        }

        if let Some(ball) = self.world.avatar(participant).and_then(|a| a.held()) {
            let outcome =
                self.with_role(|role, ctx| role.execute(Command::Drop { ball, by: participant }, ctx));
            self.absorb(outcome);
        }

        self.world.despawn_avatar(participant);
        let winner = self.world.roster.remove_participant(participant);
        self.channel
            .send(Scope::ToAllFromAuthority, Rpc::ParticipantLeft { participant });
        self.notify(&GameEvent::ParticipantLeft { participant });

        let actions = self
            .lifecycle
            .participant_departed(participant, self.world.roster.len());
        self.execute(actions);

        if let Some(winner) = winner {
            self.declare_winner(winner);
        }
    }

    pub fn start_match(&mut self) -> Result<(), LifecycleError> {
        let actions = self.lifecycle.start_match(&mut self.rng)?;
        self.execute(actions);
        Ok(())
    }

    pub fn go_to_level(&mut self, level: LevelId) -> Result<(), LifecycleError> {
        let actions = self.lifecycle.go_to_level(level)?;
        self.execute(actions);
        Ok(())
    }

    /// Hands an envelope from the transport to the session
    pub fn deliver(&mut self, envelope: Envelope) {
        self.channel.receive(envelope);
        self.process_inbox();
    }

    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.channel.drain_outgoing()
    }

    /// Advances the session by one fixed tick
    pub fn tick(&mut self, dt: f32, input: &InputSnapshot) {
        self.ticks += 1;
        self.collaborators.scene.tick(dt);
        self.world.begin_tick();
        self.process_inbox();

        self.handle_input(input);
        let outcome = self.with_role(|role, ctx| role.simulate(dt, ctx));
        self.absorb(outcome);

        let context = TickContext {
            participant_count: self.world.roster.len(),
            scene_loaded: self.collaborators.scene.is_loaded(),
        };
        let actions = self.lifecycle.tick(dt, &context, &mut self.rng);
        self.execute(actions);

        self.with_role(|role, ctx| role.replicate(dt, ctx));
        self.process_inbox();
    }

    fn handle_input(&mut self, input: &InputSnapshot) {
        let local = self.local_id();
        let pressed = self.action.press(input.action);
        self.world.set_intent(local, input.movement);
        if !pressed {
            return;
        }

        let Some(command) = self.choose_action(local, input.aim_target) else {
            return;
        };
        let outcome = self.with_role(|role, ctx| role.issue(command, ctx));
        self.absorb(outcome);
    }

    /// Throws what the participant holds, otherwise picks up the closest free projectile
    fn choose_action(&self, participant: ParticipantId, target: Vec3) -> Option<Command> {
        let avatar = self.world.avatar(participant)?;
        if !self.world.roster.is_alive(participant) || !avatar.can_act() {
            return None;
        }

        match avatar.held() {
            Some(ball) => Some(Command::Throw {
                ball,
                by: participant,
                target,
            }),
            None => self
                .world
                .closest_free_ball(participant)
                .map(|ball| Command::Pickup {
                    ball,
                    by: participant,
                }),
        }
    }

    fn absorb(&mut self, outcome: CommandOutcome) {
        for event in &outcome.events {
            self.notify(event);
        }
        if let Some(winner) = outcome.winner {
            self.declare_winner(winner);
        }
    }

    fn declare_winner(&mut self, winner: ParticipantId) {
        let was_running = self.lifecycle.is_win_running();
        let actions = self.lifecycle.declare_winner(winner);
        if was_running || !self.lifecycle.is_win_running() {
            return;
        }

        let color = self
            .world
            .roster
            .get(winner)
            .map(|p| p.color())
            .unwrap_or("Grey");
        self.notify(&GameEvent::WinnerDeclared { winner, color });
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<LifecycleAction>) {
        for action in actions {
            match action {
                LifecycleAction::Broadcast { scope, rpc } => self.channel.send(scope, rpc),
                LifecycleAction::LoadLevel(level) => self.collaborators.scene.load_level(level),
                LifecycleAction::ResetLevel => self.reset_level(),
                LifecycleAction::ResetRoster => self.world.roster.reset_all(),
                LifecycleAction::Notify(event) => self.notify(&event),
            }
        }
    }

    /// Releases every projectile, seeds the new level and respawns everyone
    fn reset_level(&mut self) {
        let released = self.world.pool.release_all(&mut self.channel);
        self.world.clear_holdings();

        let ball_bounds = self.ball_bounds();
        let mut seeded = 0;
        for _ in 0..self.config.lifecycle.balls_per_level {
            let id = match self.world.pool.acquire(&mut self.channel) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Could not seed projectile: {}", e);
                    break;
                }
            };

            let buff = self.buffs.roll(&mut self.rng);
            let point = self.collaborators.spawns.spawn_point_within(ball_bounds);
            if let Some(ball) = self.world.pool.get_mut(id) {
                ball.apply_buff(buff);
                ball.transform.reset(point);
                debug!("Seeded {} with the {} buff", id, buff.title());
                self.channel
                    .send(Scope::ToAllFromAuthority, Rpc::BallSync(ball.snapshot()));
                seeded += 1;
            }
        }

        self.world.roster.reset_all();
        let avatar_bounds = self.avatar_bounds();
        let participants: Vec<ParticipantId> = self.world.roster.iter().map(|p| p.id).collect();
        for participant in participants {
            let point = self.collaborators.spawns.spawn_point_within(avatar_bounds);
            self.world.spawn_avatar(participant, point);
        }

        info!(
            "Level reset: released {} and seeded {} projectiles",
            released, seeded
        );
    }

    fn process_inbox(&mut self) {
        while let Some(envelope) = self.channel.next_incoming() {
            self.dispatch(envelope);
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let authority = self.is_authority();
        let local = self.local_id();
        let sender = envelope.sender;

        // The authority applied its own broadcasts before sending them
        if authority && sender == local && envelope.scope == Scope::ToAllFromAuthority {
            return;
        }
        if requires_authority(&envelope.payload) && envelope.sender_role != RoleKind::Authority {
            debug!("Dropping {:?} from non-authority {}", envelope.payload, sender);
            return;
        }

        match envelope.payload {
            Rpc::Request(command) => {
                if authority {
                    let outcome = self.with_role(|role, ctx| role.on_request(sender, command, ctx));
                    self.absorb(outcome);
                }
            }
            Rpc::Enforce(command) => {
                let outcome = self.with_role(|role, ctx| role.on_enforce(command, ctx));
                self.absorb(outcome);
            }
            Rpc::BallSpawned { ball } => self.world.pool.mirror_spawn(ball),
            Rpc::SetActive { ball, active } => {
                self.world.pool.mirror_set_active(ball, active);
                self.world.sync_holder(ball);
            }
            Rpc::BallSync(snapshot) => {
                let was_deadly = self.is_deadly(snapshot.ball);
                self.world.pool.mirror_snapshot(&snapshot);
                self.world.sync_holder(snapshot.ball);
                if was_deadly && !self.is_deadly(snapshot.ball) {
                    self.notify(&GameEvent::BallNotDeadly {
                        ball: snapshot.ball,
                    });
                }
            }
            Rpc::Bounce {
                ball,
                normal,
                direction,
                count,
            } => self.mirror_bounce(ball, normal, direction, count),
            Rpc::Transform { entity, state } => {
                self.world.apply_transform(entity, &state, local, false);
            }
            Rpc::Reconcile { entity, state } => {
                self.world.apply_transform(entity, &state, local, true);
            }
            Rpc::AvatarMove { movement } => {
                if authority {
                    self.world.set_intent(sender, movement);
                }
            }
            Rpc::ParticipantJoined {
                participant,
                slot,
                alive,
            } => self.mirror_join(participant, slot, alive),
            Rpc::ParticipantLeft { participant } => self.mirror_leave(participant),
            Rpc::GoToLevel { level } => {
                let actions = self.lifecycle.follow_level(level);
                self.execute(actions);
            }
            Rpc::ClientLoaded => self.lifecycle.record_loaded(sender),
            Rpc::EnterLevel => self.lifecycle.release_enter(),
            Rpc::DeclareWinner { winner } => self.declare_winner(winner),
            Rpc::MatchSync { phase, level } => {
                let actions = self.lifecycle.sync_late_join(phase, level);
                self.execute(actions);
            }
        }
    }

    fn is_deadly(&self, ball: BallId) -> bool {
        self.world.pool.get(ball).map(|b| b.is_deadly()).unwrap_or(false)
    }

    fn mirror_bounce(&mut self, ball: BallId, normal: Vec3, direction: Vec3, count: u32) {
        let Some(projectile) = self.world.pool.get_mut(ball) else {
            return;
        };

        let was_deadly = projectile.is_deadly();
        projectile.mirror_bounce(direction, count);
        let explosion = projectile.buff().explodes_on_bounce();
        let spent = was_deadly && !projectile.is_deadly();

        self.notify(&GameEvent::BallBounced {
            ball,
            normal,
            direction,
            count,
            explosion,
        });
        if spent {
            self.notify(&GameEvent::BallNotDeadly { ball });
        }
    }

    fn mirror_join(&mut self, participant: ParticipantId, slot: u8, alive: bool) {
        let known = self.world.roster.contains(participant);
        self.world.roster.insert_with_slot(participant, slot, alive);
        if self.world.avatar(participant).is_none() {
            self.world.spawn_avatar(participant, Vec3::ZERO);
        }
        if !known {
            self.notify(&GameEvent::ParticipantJoined { participant, slot });
        }
    }

    fn mirror_leave(&mut self, participant: ParticipantId) {
        if !self.world.roster.contains(participant) {
            return;
        }
        self.world.roster.remove_participant(participant);
        self.world.despawn_avatar(participant);
        self.notify(&GameEvent::ParticipantLeft { participant });
    }

    /// Position of a replicated entity as this session sees it
    pub fn position_of(&self, entity: EntityRef) -> Option<Vec3> {
        match entity {
            EntityRef::Ball(id) => self.world.pool.get(id).map(|b| b.transform.position()),
            EntityRef::Avatar(id) => self.world.avatar(id).map(|a| a.position()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::EventLog;
    use crate::config::MatchConfig;
    use crate::projectile::{BallState, Membership};

    const DT: f32 = 1.0 / 60.0;

    fn quick_config(auto_start_players: usize) -> SessionConfig {
        SessionConfig {
            seed: Some(7),
            lifecycle: MatchConfig {
                exit_duration: 0.05,
                enter_duration: 0.05,
                wait_between_transitions: 0.0,
                wait_before_win: 0.05,
                win_screen_duration: 0.05,
                auto_start_players,
                ..MatchConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    fn host(auto_start_players: usize) -> (Session, EventLog) {
        let log = EventLog::new();
        let collaborators = Collaborators::headless(3, 0.0, Box::new(log.clone()));
        let session = Session::host(quick_config(auto_start_players), collaborators).unwrap();
        (session, log)
    }

    fn run(session: &mut Session, ticks: usize) {
        for _ in 0..ticks {
            session.tick(DT, &InputSnapshot::default());
        }
    }

    #[test]
    fn test_host_warms_pool_and_registers_itself() {
        let (session, log) = host(0);
        assert_eq!(session.world().pool.pooled_count(), 5);
        assert!(session.world().roster.contains(HOST_PARTICIPANT));
        assert!(session.world().avatar(HOST_PARTICIPANT).is_some());
        assert_eq!(
            log.count(|e| matches!(e, GameEvent::ParticipantJoined { .. })),
            1
        );
        assert_eq!(session.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn test_solo_host_reaches_playing() {
        let (mut session, log) = host(0);
        session.start_match().unwrap();
        run(&mut session, 60);

        assert_eq!(session.phase(), MatchPhase::Playing);
        assert_eq!(session.world().pool.active_count(), 4);
        assert_eq!(log.count(|e| matches!(e, GameEvent::LevelEntered { .. })), 1);
        for ball in session.world().pool.iter_active() {
            assert_eq!(ball.membership(), Membership::Active);
            assert_eq!(ball.state(), BallState::Idle);
        }
    }

    #[test]
    fn test_auto_start_on_second_participant() {
        let (mut session, _) = host(2);
        assert_eq!(session.phase(), MatchPhase::Lobby);

        session.participant_joined(1).unwrap();
        assert_eq!(session.phase(), MatchPhase::LevelLoading);
    }

    #[test]
    fn test_join_broadcasts_world_state() {
        let (mut session, _) = host(0);
        session.take_outgoing();
        session.participant_joined(1).unwrap();

        let payloads: Vec<Rpc> = session
            .take_outgoing()
            .into_iter()
            .map(|o| o.envelope.payload)
            .collect();
        let joined = payloads
            .iter()
            .filter(|p| matches!(p, Rpc::ParticipantJoined { .. }))
            .count();
        let synced = payloads
            .iter()
            .filter(|p| matches!(p, Rpc::BallSync(_)))
            .count();

        assert_eq!(joined, 2);
        assert_eq!(synced, 5);
        assert!(matches!(
            payloads.last(),
            Some(Rpc::MatchSync {
                phase: MatchPhase::Lobby,
                level: None
            })
        ));
    }

    #[test]
    fn test_departure_releases_load_barrier() {
        let (mut session, log) = host(2);
        session.participant_joined(1).unwrap();
        run(&mut session, 10);
        assert_eq!(session.phase(), MatchPhase::LevelLoading);

        // The proxy never signals, so the barrier only closes once it leaves
        session.participant_left(1);
        run(&mut session, 30);
        assert_eq!(session.phase(), MatchPhase::Playing);
        assert_eq!(
            log.count(|e| matches!(e, GameEvent::ParticipantLeft { participant: 1 })),
            1
        );
    }

    #[test]
    fn test_host_picks_up_with_action_edge() {
        let (mut session, log) = host(0);
        session.start_match().unwrap();
        run(&mut session, 60);

        let ball = session.world().pool.active_ids()[0];
        let position = session.position_of(EntityRef::Ball(ball)).unwrap();
        let avatar = session.position_of(EntityRef::Avatar(HOST_PARTICIPANT)).unwrap();
        let walk = (position - avatar).flatten();

        // Walk onto the projectile; the avatar cannot overshoot by more than a tick
        let speed = session.config().avatar.walk_speed;
        let ticks = (walk.magnitude() / (speed * DT)).floor() as usize;
        for _ in 0..ticks {
            session.tick(
                DT,
                &InputSnapshot {
                    movement: walk.normalize(),
                    ..InputSnapshot::default()
                },
            );
        }

        let pressed = InputSnapshot {
            action: true,
            ..InputSnapshot::default()
        };
        session.tick(DT, &pressed);
        session.tick(DT, &pressed);

        assert_eq!(log.count(|e| matches!(e, GameEvent::BallPickedUp { .. })), 1);
        assert!(session
            .world()
            .avatar(HOST_PARTICIPANT)
            .unwrap()
            .held()
            .is_some());
    }
}

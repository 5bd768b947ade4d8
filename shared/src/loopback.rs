//! In-memory transport between one host session and its proxies
//!
//! Envelopes are moved the same way the UDP server moves them: everything a
//! proxy sends goes to the host, everything the host sends goes to every
//! proxy except the one it excludes.

use crate::collaborators::InputSnapshot;
use crate::error::SessionError;
use crate::protocol::ParticipantId;
use crate::session::{Collaborators, Session};
use log::debug;

pub struct LoopbackHub {
    pub host: Session,
    pub proxies: Vec<Session>,
    next_id: ParticipantId,
}

impl LoopbackHub {
    pub fn new(host: Session) -> Self {
        Self {
            host,
            proxies: Vec::new(),
            next_id: 1,
        }
    }

    /// Adds a proxy session and announces it to the host
    pub fn connect(&mut self, collaborators: Collaborators) -> Result<ParticipantId, SessionError> {
        let id = self.next_id;
        self.next_id += 1;

        let config = self.host.config().clone();
        self.proxies.push(Session::proxy(id, config, collaborators));
        self.host.participant_joined(id)?;
        self.pump();
        Ok(id)
    }

    pub fn disconnect(&mut self, id: ParticipantId) -> Option<Session> {
        let index = self.proxies.iter().position(|p| p.local_id() == id)?;
        let proxy = self.proxies.remove(index);
        self.host.participant_left(id);
        self.pump();
        Some(proxy)
    }

    pub fn proxy(&self, id: ParticipantId) -> Option<&Session> {
        self.proxies.iter().find(|p| p.local_id() == id)
    }

    /// Moves envelopes until every session is quiet, returning how many were delivered
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut moved = 0;

            for outgoing in self.host.take_outgoing() {
                for proxy in self.proxies.iter_mut() {
                    if outgoing.exclude == Some(proxy.local_id()) {
                        continue;
                    }
                    proxy.deliver(outgoing.envelope.clone());
                    moved += 1;
                }
            }

            for proxy in self.proxies.iter_mut() {
                for outgoing in proxy.take_outgoing() {
                    self.host.deliver(outgoing.envelope);
                    moved += 1;
                }
            }

            if moved == 0 {
                break;
            }
            delivered += moved;
        }

        debug!("Loopback delivered {} envelopes", delivered);
        delivered
    }

    /// Ticks every session once with per-participant input, then pumps
    pub fn tick(&mut self, dt: f32, input: impl Fn(ParticipantId) -> InputSnapshot) {
        let host_input = input(self.host.local_id());
        self.host.tick(dt, &host_input);
        for proxy in self.proxies.iter_mut() {
            let proxy_input = input(proxy.local_id());
            proxy.tick(dt, &proxy_input);
        }
        self.pump();
    }

    /// Ticks with idle input
    pub fn run(&mut self, dt: f32, ticks: usize) {
        for _ in 0..ticks {
            self.tick(dt, |_| InputSnapshot::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{EventLog, GameEvent, Silent};
    use crate::config::{MatchConfig, SessionConfig};
    use crate::lifecycle::MatchPhase;

    const DT: f32 = 1.0 / 60.0;

    fn hub(auto_start_players: usize) -> LoopbackHub {
        let config = SessionConfig {
            seed: Some(1),
            lifecycle: MatchConfig {
                exit_duration: 0.05,
                enter_duration: 0.05,
                wait_between_transitions: 0.0,
                auto_start_players,
                ..MatchConfig::default()
            },
            ..SessionConfig::default()
        };
        let host = Session::host(config, Collaborators::headless(1, 0.0, Box::new(Silent))).unwrap();
        LoopbackHub::new(host)
    }

    #[test]
    fn test_proxy_mirrors_roster_and_pool() {
        let mut hub = hub(0);
        let log = EventLog::new();
        let id = hub
            .connect(Collaborators::headless(2, 0.0, Box::new(log.clone())))
            .unwrap();

        let proxy = hub.proxy(id).unwrap();
        assert_eq!(proxy.world().roster.len(), 2);
        assert_eq!(proxy.world().pool.total_created(), 5);
        assert!(proxy.world().avatar(id).is_some());
        assert_eq!(
            log.count(|e| matches!(e, GameEvent::ParticipantJoined { .. })),
            2
        );
    }

    #[test]
    fn test_everyone_reaches_playing_through_the_barrier() {
        let mut hub = hub(3);
        hub.connect(Collaborators::headless(2, 0.2, Box::new(Silent)))
            .unwrap();
        hub.run(DT, 30);
        assert_eq!(hub.host.phase(), MatchPhase::Lobby);

        hub.connect(Collaborators::headless(3, 0.2, Box::new(Silent)))
            .unwrap();
        hub.run(DT, 120);

        assert_eq!(hub.host.phase(), MatchPhase::Playing);
        for proxy in &hub.proxies {
            assert_eq!(proxy.phase(), MatchPhase::Playing);
            assert_eq!(proxy.world().pool.active_count(), 4);
        }
    }

    #[test]
    fn test_disconnect_is_mirrored() {
        let mut hub = hub(0);
        let first = hub
            .connect(Collaborators::headless(2, 0.0, Box::new(Silent)))
            .unwrap();
        let second = hub
            .connect(Collaborators::headless(3, 0.0, Box::new(Silent)))
            .unwrap();

        assert!(hub.disconnect(first).is_some());
        assert!(hub.disconnect(first).is_none());
        assert!(!hub.proxy(second).unwrap().world().roster.contains(first));
        assert!(!hub.host.world().roster.contains(first));
    }
}

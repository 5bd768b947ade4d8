//! Client network layer: UDP transport for a proxy session
//!
//! Envelopes that must arrive go through a reliable stream and are resent
//! until the server acks them; transform updates are sent once.

use crate::input::BotInput;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::collaborators::LogPresentation;
use shared::reliable::RESEND_INTERVAL;
use shared::{
    Collaborators, OrderedInbox, Packet, ReliableOutbox, Session, SessionConfig, SessionError,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, MissedTickBehavior};

const MAX_DATAGRAM: usize = 4096;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: SessionConfig,
    seed: u64,
    load_time: f32,

    session: Option<Session>,
    bot: BotInput,

    outbox: ReliableOutbox,
    inbox: OrderedInbox,
    /// Sequence numbers to acknowledge on the next flush
    acks: Vec<u32>,

    ping_ms: u64,
    fake_ping_ms: u64,
    last_heartbeat: Instant,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        config: SessionConfig,
        seed: u64,
        load_time: f32,
        fake_ping_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            config,
            seed,
            load_time,
            session: None,
            bot: BotInput::new(seed),
            outbox: ReliableOutbox::new(),
            inbox: OrderedInbox::new(),
            acks: Vec::new(),
            ping_ms: 0,
            fake_ping_ms,
            last_heartbeat: Instant::now(),
        })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn ping_ms(&self) -> u64 {
        self.ping_ms
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Ships pending acks and every envelope the proxy session queued
    async fn flush_session(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for seq in std::mem::take(&mut self.acks) {
            self.send_packet(&Packet::Ack { seq }).await?;
        }

        let outgoing = match self.session.as_mut() {
            Some(session) => session.take_outgoing(),
            None => return Ok(()),
        };
        for outgoing in outgoing {
            let packet = self.outbox.pack(outgoing.envelope);
            self.send_packet(&packet).await?;
        }
        Ok(())
    }

    async fn resend_unacked(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for packet in self.outbox.due(Instant::now(), RESEND_INTERVAL) {
            self.send_packet(&packet).await?;
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), SessionError> {
        match packet {
            Packet::Connected { participant_id } => {
                info!("Connected! Participant ID: {}", participant_id);
                let collaborators = Collaborators::headless(
                    self.seed,
                    self.load_time,
                    Box::new(LogPresentation::new(format!("proxy {}", participant_id))),
                );
                self.session = Some(Session::proxy(
                    participant_id,
                    self.config.clone(),
                    collaborators,
                ));
                self.outbox = ReliableOutbox::new();
                self.inbox = OrderedInbox::new();
            }

            Packet::Rpc(envelope) => match self.session.as_mut() {
                Some(session) => session.deliver(envelope),
                None => debug!("Envelope before the connection was accepted"),
            },

            Packet::ReliableRpc { seq, envelope } => {
                let Some(session) = self.session.as_mut() else {
                    debug!("Sequenced envelope before the connection was accepted");
                    return Ok(());
                };
                // Duplicates are acked again in case the first ack was lost
                self.acks.push(seq);
                for envelope in self.inbox.accept(seq, envelope) {
                    session.deliver(envelope);
                }
            }

            Packet::Ack { seq } => {
                if !self.outbox.ack(seq) {
                    debug!("Stale ack {}", seq);
                }
            }

            Packet::Heartbeat => {
                self.ping_ms = self.last_heartbeat.elapsed().as_millis() as u64;
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.session = None;
                return Err(SessionError::Disconnected { reason });
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        Ok(())
    }

    fn tick(&mut self, dt: f32) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let input = self.bot.sample(session);
        session.tick(dt, &input);

        if session.ticks() % 300 == 0 {
            debug!(
                "Tick {}: phase {:?}, ping {} ms",
                session.ticks(),
                session.phase(),
                self.ping_ms
            );
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;

        let dt = self.config.tick_seconds();
        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
        let mut resend_interval = interval(RESEND_INTERVAL / 2);
        let started = Instant::now();

        let mut buffer = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    self.handle_packet(packet)?;
                                    self.flush_session().await?;
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    if self.session.is_none() && started.elapsed() > CONNECT_TIMEOUT {
                        return Err(SessionError::ConnectFailed {
                            reason: format!("no answer from {}", self.server_addr),
                        }
                        .into());
                    }
                    self.tick(dt);
                    self.flush_session().await?;
                },

                _ = resend_interval.tick() => {
                    self.resend_unacked().await?;
                },

                _ = heartbeat_interval.tick() => {
                    if self.session.is_some() {
                        self.last_heartbeat = Instant::now();
                        self.send_packet(&Packet::Heartbeat).await?;
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving the session");
                    break;
                },
            }
        }

        if self.session.is_some() {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Envelope, RoleKind, Rpc, Scope};

    async fn test_client() -> Client {
        let config = SessionConfig {
            seed: Some(4),
            ..SessionConfig::default()
        };
        Client::new("127.0.0.1:9", config, 4, 0.0, 0).await.unwrap()
    }

    #[tokio::test]
    async fn test_connected_builds_proxy_session() {
        let mut client = test_client().await;
        assert!(client.session().is_none());

        client
            .handle_packet(Packet::Connected { participant_id: 3 })
            .unwrap();

        let session = client.session().unwrap();
        assert_eq!(session.local_id(), 3);
        assert_eq!(session.role(), RoleKind::Proxy);
    }

    #[tokio::test]
    async fn test_envelopes_reach_the_session() {
        let mut client = test_client().await;
        client
            .handle_packet(Packet::Connected { participant_id: 2 })
            .unwrap();
        client
            .handle_packet(Packet::Rpc(Envelope {
                sender: 0,
                sender_role: RoleKind::Authority,
                scope: Scope::ToAllFromAuthority,
                payload: Rpc::ParticipantJoined {
                    participant: 0,
                    slot: 0,
                    alive: true,
                },
            }))
            .unwrap();

        assert!(client.session().unwrap().world().roster.contains(0));
    }

    fn go_to_level(level: shared::LevelId) -> Envelope {
        Envelope {
            sender: 0,
            sender_role: RoleKind::Authority,
            scope: Scope::ToAllFromAuthority,
            payload: Rpc::GoToLevel { level },
        }
    }

    #[tokio::test]
    async fn test_sequenced_envelopes_wait_for_gaps() {
        let mut client = test_client().await;
        client
            .handle_packet(Packet::Connected { participant_id: 2 })
            .unwrap();

        client
            .handle_packet(Packet::ReliableRpc {
                seq: 1,
                envelope: go_to_level(2),
            })
            .unwrap();
        assert_eq!(client.session().unwrap().lifecycle().level(), None);

        client
            .handle_packet(Packet::ReliableRpc {
                seq: 0,
                envelope: go_to_level(1),
            })
            .unwrap();
        // Both applied in send order, so the later level wins
        assert_eq!(client.session().unwrap().lifecycle().level(), Some(2));
        assert_eq!(client.acks, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_ack_clears_outbox() {
        let mut client = test_client().await;
        client
            .handle_packet(Packet::Connected { participant_id: 2 })
            .unwrap();
        let packet = client.outbox.pack(Envelope {
            sender: 2,
            sender_role: RoleKind::Proxy,
            scope: Scope::ToAuthority,
            payload: Rpc::ClientLoaded,
        });
        assert!(matches!(packet, Packet::ReliableRpc { seq: 0, .. }));

        client.handle_packet(Packet::Ack { seq: 0 }).unwrap();
        assert_eq!(client.outbox.pending(), 0);
    }

    #[test]
    fn test_disconnect_is_terminal() {
        tokio_test::block_on(async {
            let mut client = test_client().await;
            client
                .handle_packet(Packet::Connected { participant_id: 1 })
                .unwrap();

            let result = client.handle_packet(Packet::Disconnected {
                reason: "Server full".to_string(),
            });
            assert_eq!(
                result,
                Err(SessionError::Disconnected {
                    reason: "Server full".to_string()
                })
            );
            assert!(client.session().is_none());
        });
    }
}

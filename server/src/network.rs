//! Server network layer: UDP transport for the authority session
//!
//! Envelopes to and from each proxy travel through that connection's reliable
//! stream, so lifecycle signals and commands survive datagram loss and arrive
//! in order. Transform updates are sent once.

use crate::client_manager::{ClientManager, CLIENT_TIMEOUT};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::reliable::RESEND_INTERVAL;
use shared::{
    Collaborators, Envelope, InputSnapshot, Packet, ParticipantId, Session, SessionConfig,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Largest datagram the server accepts
pub const MAX_DATAGRAM: usize = 4096;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ParticipantId },
    Shutdown,
}

/// Messages sent from the session loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ParticipantId>,
    },
    /// An envelope for every proxy's stream, sequenced per connection
    BroadcastRpc {
        envelope: Envelope,
        exclude: Option<ParticipantId>,
    },
}

/// Hosts the authority session and relays its envelopes over UDP
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    session: Session,
    tick_duration: Duration,
    tick_seconds: f32,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: SessionConfig,
        collaborators: Collaborators,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let tick_duration = config.tick_duration();
        let tick_seconds = config.tick_seconds();
        let session = Session::host(config, collaborators)?;

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            session,
            tick_duration,
            tick_seconds,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = clients.read().await.get_client_addrs();

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }
                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                    GameMessage::BroadcastRpc { envelope, exclude } => {
                        let packets = clients.write().await.pack_for(&envelope, exclude);

                        for (client_id, addr, packet) in packets {
                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that resends unacknowledged envelopes
    fn spawn_resender(&self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            let mut interval = interval(RESEND_INTERVAL / 2);

            loop {
                interval.tick().await;

                let resends = clients
                    .write()
                    .await
                    .due_resends(Instant::now(), RESEND_INTERVAL);
                for (addr, packet) in resends {
                    if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                        error!("Failed to resend to {}: {}", addr, e);
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts(CLIENT_TIMEOUT);
                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ParticipantId>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Hands every envelope the session queued to the sender task
    fn flush_session(&mut self) {
        for outgoing in self.session.take_outgoing() {
            let message = GameMessage::BroadcastRpc {
                envelope: outgoing.envelope,
                exclude: outgoing.exclude,
            };
            if let Err(e) = self.game_tx.send(message) {
                error!("Failed to queue envelope: {}", e);
            }
        }
    }

    async fn drop_client(&mut self, client_id: ParticipantId) {
        self.clients.write().await.remove_client(client_id);
        self.session.participant_left(client_id);
        self.flush_session();
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            let reason = format!(
                "Protocol version mismatch: expected {}, got {}",
                PROTOCOL_VERSION, client_version
            );
            self.send_packet(Packet::Disconnected { reason }, addr);
            return;
        }

        let existing = self.clients.read().await.find_client_by_addr(addr);
        if let Some(existing_id) = existing {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.drop_client(existing_id).await;
        }

        let Some(client_id) = self.clients.write().await.add_client(addr) else {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
                addr,
            );
            return;
        };

        self.send_packet(
            Packet::Connected {
                participant_id: client_id,
            },
            addr,
        );

        if let Err(e) = self.session.participant_joined(client_id) {
            warn!("Rejecting participant {}: {}", client_id, e);
            self.clients.write().await.remove_client(client_id);
            self.send_packet(
                Packet::Disconnected {
                    reason: e.to_string(),
                },
                addr,
            );
        }
        self.flush_session();
    }

    /// Participant bound to the address, marking it as alive
    async fn known_client(&self, addr: SocketAddr) -> Option<ParticipantId> {
        let mut clients = self.clients.write().await;
        let id = clients.find_client_by_addr(addr)?;
        clients.touch(id);
        Some(id)
    }

    fn deliver_from(&mut self, client_id: ParticipantId, envelope: Envelope) {
        if client_id != envelope.sender {
            warn!(
                "Client {} sent an envelope claiming to be {}",
                client_id, envelope.sender
            );
            return;
        }
        self.session.deliver(envelope);
        self.flush_session();
    }

    async fn handle_rpc(&mut self, envelope: Envelope, addr: SocketAddr) {
        match self.known_client(addr).await {
            Some(id) => self.deliver_from(id, envelope),
            None => debug!("Envelope from unknown address {}", addr),
        }
    }

    async fn handle_reliable_rpc(&mut self, seq: u32, envelope: Envelope, addr: SocketAddr) {
        let Some(id) = self.known_client(addr).await else {
            debug!("Sequenced envelope from unknown address {}", addr);
            return;
        };

        // Duplicates are acked again in case the first ack was lost
        self.send_packet(Packet::Ack { seq }, addr);
        let ready = self.clients.write().await.accept(id, seq, envelope);
        for envelope in ready {
            self.deliver_from(id, envelope);
        }
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => self.handle_connect(client_version, addr).await,

            Packet::Rpc(envelope) => self.handle_rpc(envelope, addr).await,

            Packet::ReliableRpc { seq, envelope } => {
                self.handle_reliable_rpc(seq, envelope, addr).await
            }

            Packet::Ack { seq } => {
                if let Some(id) = self.known_client(addr).await {
                    if !self.clients.write().await.acknowledge(id, seq) {
                        debug!("Stale ack {} from client {}", seq, id);
                    }
                }
            }

            Packet::Heartbeat => {
                let known = {
                    let mut clients = self.clients.write().await;
                    clients
                        .find_client_by_addr(addr)
                        .map(|id| clients.touch(id))
                        .unwrap_or(false)
                };
                if known {
                    self.send_packet(Packet::Heartbeat, addr);
                }
            }

            Packet::Disconnect => {
                let client_id = self.clients.read().await.find_client_by_addr(addr);
                if let Some(client_id) = client_id {
                    self.drop_client(client_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Advances the session one fixed tick and ships what it produced
    fn tick(&mut self) {
        // The hosting participant has no local input on a dedicated server
        self.session.tick(self.tick_seconds, &InputSnapshot::default());
        self.flush_session();
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();
        self.spawn_resender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.session.participant_left(client_id);
                            self.flush_session();
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick();

                    if self.session.ticks() % 300 == 0 {
                        let client_count = self.clients.read().await.len();
                        debug!(
                            "Tick {}: {} clients, phase {:?}",
                            self.session.ticks(),
                            client_count,
                            self.session.phase()
                        );
                    }
                },
            }
        }

        self.broadcast_packet(
            Packet::Disconnected {
                reason: "Server shutting down".to_string(),
            },
            None,
        );
        Ok(())
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::collaborators::Silent;
    use shared::{RoleKind, Rpc, Scope, Vec3};

    async fn test_server(max_clients: usize) -> Server {
        let config = SessionConfig {
            seed: Some(5),
            ..SessionConfig::default()
        };
        let collaborators = Collaborators::headless(5, 0.0, Box::new(Silent));
        Server::new("127.0.0.1:0", config, collaborators, max_clients)
            .await
            .unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn drain(server: &mut Server) -> Vec<GameMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = server.game_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_connect_assigns_participant() {
        let mut server = test_server(4).await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(9001),
            )
            .await;

        let messages = drain(&mut server);
        match messages.first() {
            Some(GameMessage::SendPacket {
                packet: Packet::Connected { participant_id },
                addr: a,
            }) => {
                assert_eq!(*participant_id, 1);
                assert_eq!(*a, addr(9001));
            }
            other => panic!("Unexpected first message: {:?}", other),
        }
        assert!(messages
            .iter()
            .any(|m| matches!(m, GameMessage::BroadcastRpc { exclude: None, .. })));
        assert!(server.session().world().roster.contains(1));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let mut server = test_server(4).await;
        server
            .handle_packet(Packet::Connect { client_version: 0 }, addr(9002))
            .await;

        let messages = drain(&mut server);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            GameMessage::SendPacket {
                packet: Packet::Disconnected { .. },
                ..
            }
        ));
        assert_eq!(server.session().world().roster.len(), 1);
    }

    #[tokio::test]
    async fn test_full_server_refuses() {
        let mut server = test_server(1).await;
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        server.handle_packet(connect.clone(), addr(9003)).await;
        drain(&mut server);

        server.handle_packet(connect, addr(9004)).await;
        let messages = drain(&mut server);
        assert!(matches!(
            &messages[0],
            GameMessage::SendPacket {
                packet: Packet::Disconnected { reason },
                ..
            } if reason == "Server full"
        ));
    }

    #[tokio::test]
    async fn test_spoofed_sender_is_ignored() {
        let mut server = test_server(4).await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(9005),
            )
            .await;
        drain(&mut server);

        let spoofed = Envelope {
            sender: 0,
            sender_role: RoleKind::Authority,
            scope: Scope::ToAll,
            payload: Rpc::DeclareWinner { winner: 1 },
        };
        server.handle_packet(Packet::Rpc(spoofed), addr(9005)).await;

        assert!(drain(&mut server).is_empty());
        assert!(!server.session().lifecycle().is_win_running());
    }

    fn intent(x: f32, z: f32) -> Envelope {
        Envelope {
            sender: 1,
            sender_role: RoleKind::Proxy,
            scope: Scope::ToAuthority,
            payload: Rpc::AvatarMove {
                movement: Vec3::new(x, 0.0, z),
            },
        }
    }

    #[tokio::test]
    async fn test_sequenced_envelopes_are_acked_and_ordered() {
        let mut server = test_server(4).await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(9008),
            )
            .await;
        drain(&mut server);

        server
            .handle_packet(
                Packet::ReliableRpc {
                    seq: 1,
                    envelope: intent(0.0, 1.0),
                },
                addr(9008),
            )
            .await;
        assert!(matches!(
            &drain(&mut server)[..],
            [GameMessage::SendPacket {
                packet: Packet::Ack { seq: 1 },
                ..
            }]
        ));
        let avatar = server.session().world().avatar(1).unwrap();
        assert_eq!(avatar.intent(), Vec3::ZERO);

        server
            .handle_packet(
                Packet::ReliableRpc {
                    seq: 0,
                    envelope: intent(1.0, 0.0),
                },
                addr(9008),
            )
            .await;
        let avatar = server.session().world().avatar(1).unwrap();
        assert_eq!(avatar.intent(), Vec3::new(0.0, 0.0, 1.0));
    }

    #[tokio::test]
    async fn test_acks_stop_resends() {
        let mut server = test_server(4).await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(9009),
            )
            .await;

        // The sender task is not running, so pack the join broadcast by hand
        for message in drain(&mut server) {
            if let GameMessage::BroadcastRpc { envelope, exclude } = message {
                server.clients.write().await.pack_for(&envelope, exclude);
            }
        }
        let later = Instant::now() + Duration::from_secs(1);
        let owed = server
            .clients
            .write()
            .await
            .due_resends(later, RESEND_INTERVAL)
            .len();
        assert!(owed > 0);

        server.handle_packet(Packet::Ack { seq: 0 }, addr(9009)).await;
        let still_owed = server
            .clients
            .write()
            .await
            .due_resends(later + RESEND_INTERVAL, RESEND_INTERVAL)
            .len();
        assert_eq!(still_owed, owed - 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_participant() {
        let mut server = test_server(4).await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(9006),
            )
            .await;
        server.handle_packet(Packet::Disconnect, addr(9006)).await;

        assert!(!server.session().world().roster.contains(1));
        assert!(server.clients.read().await.is_empty());
    }

    #[test]
    fn test_heartbeat_is_echoed_to_known_clients() {
        tokio_test::block_on(async {
            let mut server = test_server(4).await;
            server.handle_packet(Packet::Heartbeat, addr(9007)).await;
            assert!(drain(&mut server).is_empty());

            server
                .handle_packet(
                    Packet::Connect {
                        client_version: PROTOCOL_VERSION,
                    },
                    addr(9007),
                )
                .await;
            drain(&mut server);
            server.handle_packet(Packet::Heartbeat, addr(9007)).await;

            let messages = drain(&mut server);
            assert!(matches!(
                &messages[..],
                [GameMessage::SendPacket {
                    packet: Packet::Heartbeat,
                    ..
                }]
            ));
        });
    }

    #[tokio::test]
    async fn test_tick_advances_session() {
        let mut server = test_server(4).await;
        server.tick();
        server.tick();
        assert_eq!(server.session().ticks(), 2);
    }
}

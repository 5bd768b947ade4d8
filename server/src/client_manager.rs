//! Connection tracking for the authority process
//!
//! Maps socket addresses to participant ids, enforces the participant cap and
//! detects proxies that went silent. Participant ids start at 1 because the
//! hosting participant always owns id 0. Each connection also owns both halves
//! of its reliable envelope stream.

use log::info;
use shared::{Envelope, OrderedInbox, Packet, ParticipantId, ReliableOutbox};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a proxy may stay silent before it is dropped
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected proxy process
#[derive(Debug)]
pub struct Client {
    pub id: ParticipantId,
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    pub outbox: ReliableOutbox,
    pub inbox: OrderedInbox,
}

impl Client {
    pub fn new(id: ParticipantId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            outbox: ReliableOutbox::new(),
            inbox: OrderedInbox::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct ClientManager {
    clients: HashMap<ParticipantId, Client>,
    next_client_id: ParticipantId,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Returns the new participant id, or None when the server is full
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ParticipantId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: ParticipantId) -> bool {
        if let Some(client) = self.clients.remove(&client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    /// Marks a client as alive; false when the id is unknown
    pub fn touch(&mut self, client_id: ParticipantId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every client silent for longer than `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ParticipantId> {
        let timed_out: Vec<ParticipantId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(*client_id);
        }
        timed_out
    }

    /// Packs one envelope into every connection's stream except the excluded one
    pub fn pack_for(
        &mut self,
        envelope: &Envelope,
        exclude: Option<ParticipantId>,
    ) -> Vec<(ParticipantId, SocketAddr, Packet)> {
        self.clients
            .values_mut()
            .filter(|client| Some(client.id) != exclude)
            .map(|client| (client.id, client.addr, client.outbox.pack(envelope.clone())))
            .collect()
    }

    /// False when the client or the sequence number is unknown
    pub fn acknowledge(&mut self, client_id: ParticipantId, seq: u32) -> bool {
        self.clients
            .get_mut(&client_id)
            .map(|client| client.outbox.ack(seq))
            .unwrap_or(false)
    }

    /// Feeds a sequenced envelope into the client's inbox, returning what is now in order
    pub fn accept(&mut self, client_id: ParticipantId, seq: u32, envelope: Envelope) -> Vec<Envelope> {
        match self.clients.get_mut(&client_id) {
            Some(client) => client.inbox.accept(seq, envelope),
            None => Vec::new(),
        }
    }

    /// Unacknowledged packets that waited at least `after`, with their destination
    pub fn due_resends(&mut self, now: Instant, after: Duration) -> Vec<(SocketAddr, Packet)> {
        let mut resends = Vec::new();
        for client in self.clients.values_mut() {
            let addr = client.addr;
            resends.extend(client.outbox.due(now, after).into_iter().map(|packet| (addr, packet)));
        }
        resends
    }

    pub fn get_client_addrs(&self) -> Vec<(ParticipantId, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{RoleKind, Rpc, Scope};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_ids_start_after_the_host() {
        let mut manager = ClientManager::new(3);

        assert_eq!(manager.add_client(test_addr()), Some(1));
        assert_eq!(manager.add_client(test_addr2()), Some(2));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = ClientManager::new(1);
        let first = manager.add_client(test_addr()).unwrap();
        assert!(manager.remove_client(first));
        assert!(!manager.remove_client(first));

        let second = manager.add_client(test_addr()).unwrap();
        assert_ne!(first, second);
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(2);
        let id = manager.add_client(test_addr()).unwrap();
        manager.add_client(test_addr2()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(id));
        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown), None);
    }

    fn loaded_signal(sender: ParticipantId) -> Envelope {
        Envelope {
            sender,
            sender_role: RoleKind::Proxy,
            scope: Scope::ToAuthority,
            payload: Rpc::ClientLoaded,
        }
    }

    #[test]
    fn test_streams_are_per_client() {
        let mut manager = ClientManager::new(2);
        let first = manager.add_client(test_addr()).unwrap();
        let second = manager.add_client(test_addr2()).unwrap();

        let envelope = Envelope {
            sender: 0,
            sender_role: RoleKind::Authority,
            scope: Scope::ToAllFromAuthority,
            payload: Rpc::EnterLevel,
        };
        manager.pack_for(&envelope, None);
        let packed = manager.pack_for(&envelope, Some(first));
        assert_eq!(packed.len(), 1);
        assert!(matches!(
            &packed[0],
            (id, _, Packet::ReliableRpc { seq: 1, .. }) if *id == second
        ));

        // Only the second client still owes acks for both envelopes
        assert!(manager.acknowledge(first, 0));
        let later = Instant::now() + Duration::from_secs(1);
        let resends = manager.due_resends(later, Duration::from_millis(150));
        assert_eq!(resends.len(), 2);
        assert!(resends.iter().all(|(addr, _)| *addr == test_addr2()));
    }

    #[test]
    fn test_inbound_stream_is_ordered() {
        let mut manager = ClientManager::new(1);
        let id = manager.add_client(test_addr()).unwrap();

        assert!(manager.accept(id, 1, loaded_signal(id)).is_empty());
        assert_eq!(manager.accept(id, 0, loaded_signal(id)).len(), 2);
        assert!(manager.accept(id, 0, loaded_signal(id)).is_empty());
        assert!(manager.accept(99, 0, loaded_signal(99)).is_empty());
    }

    #[test]
    fn test_timeouts_remove_silent_clients() {
        let mut manager = ClientManager::new(2);
        let silent = manager.add_client(test_addr()).unwrap();
        let chatty = manager.add_client(test_addr2()).unwrap();

        manager.clients.get_mut(&silent).unwrap().last_seen =
            Instant::now() - Duration::from_secs(2);
        assert!(manager.touch(chatty));
        assert!(!manager.touch(99));

        let timed_out = manager.check_timeouts(Duration::from_secs(1));
        assert_eq!(timed_out, vec![silent]);
        assert_eq!(manager.get_client_addrs(), vec![(chatty, test_addr2())]);
    }
}

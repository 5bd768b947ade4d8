//! Scoped RPC delivery between the authority and its proxies
//!
//! The channel does not touch sockets. Outgoing envelopes are queued for the
//! transport to drain, incoming envelopes are filtered by scope and queued
//! for the session to handle. Envelopes addressed to the local process go
//! through the same inbox as remote ones, so the authority's own signals are
//! handled exactly like a proxy's.

use crate::protocol::{ParticipantId, Rpc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Role of a process for the whole session lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleKind {
    Authority,
    Proxy,
}

/// Delivery target of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Every participant, sender included
    ToAll,
    /// Only the authority
    ToAuthority,
    /// Every participant except the sender
    ToAllExceptSender,
    /// Every participant, accepted only when the authority sent it
    ToAllFromAuthority,
}

impl Scope {
    /// Source/target predicate deciding whether a recipient handles an envelope
    pub fn admits(self, sender_role: RoleKind, recipient_role: RoleKind, is_sender: bool) -> bool {
        match self {
            Scope::ToAll => true,
            Scope::ToAuthority => recipient_role == RoleKind::Authority,
            Scope::ToAllExceptSender => !is_sender,
            Scope::ToAllFromAuthority => sender_role == RoleKind::Authority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: ParticipantId,
    pub sender_role: RoleKind,
    pub scope: Scope,
    pub payload: Rpc,
}

/// Envelope waiting for the transport, with an optional remote participant to skip
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub envelope: Envelope,
    pub exclude: Option<ParticipantId>,
}

pub struct AuthorityChannel {
    role: RoleKind,
    local_id: ParticipantId,
    inbox: VecDeque<Envelope>,
    outbox: Vec<Outgoing>,
}

impl AuthorityChannel {
    pub fn new(role: RoleKind, local_id: ParticipantId) -> Self {
        Self {
            role,
            local_id,
            inbox: VecDeque::new(),
            outbox: Vec::new(),
        }
    }

    pub fn role(&self) -> RoleKind {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == RoleKind::Authority
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// Sends a payload with the given scope, delivering locally when the scope includes us
    pub fn send(&mut self, scope: Scope, payload: Rpc) {
        let envelope = Envelope {
            sender: self.local_id,
            sender_role: self.role,
            scope,
            payload,
        };

        if self.has_remote_recipients(scope) {
            self.outbox.push(Outgoing {
                envelope: envelope.clone(),
                exclude: None,
            });
        }

        if scope.admits(self.role, self.role, true) {
            self.inbox.push_back(envelope);
        }
    }

    fn has_remote_recipients(&self, scope: Scope) -> bool {
        match (self.role, scope) {
            (RoleKind::Authority, Scope::ToAuthority) => false,
            (RoleKind::Proxy, Scope::ToAllFromAuthority) => {
                warn!("Proxy {} tried to send an authority broadcast", self.local_id);
                false
            }
            _ => true,
        }
    }

    /// Accepts an envelope that arrived from the transport
    ///
    /// On the authority every remote sender is a proxy, whatever the envelope
    /// claims, and broadcasts from proxies are relayed to the other proxies.
    pub fn receive(&mut self, mut envelope: Envelope) {
        if self.is_authority() {
            envelope.sender_role = RoleKind::Proxy;

            if matches!(envelope.scope, Scope::ToAll | Scope::ToAllExceptSender) {
                self.outbox.push(Outgoing {
                    envelope: envelope.clone(),
                    exclude: Some(envelope.sender),
                });
            }
        }

        let is_sender = envelope.sender == self.local_id;
        if envelope
            .scope
            .admits(envelope.sender_role, self.role, is_sender)
        {
            self.inbox.push_back(envelope);
        } else {
            debug!(
                "Dropping {:?} envelope from {} at {:?}",
                envelope.scope, envelope.sender, self.role
            );
        }
    }

    pub fn next_incoming(&mut self) -> Option<Envelope> {
        self.inbox.pop_front()
    }

    pub fn has_incoming(&self) -> bool {
        !self.inbox.is_empty()
    }

    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(sender: ParticipantId, sender_role: RoleKind, scope: Scope) -> Envelope {
        Envelope {
            sender,
            sender_role,
            scope,
            payload: Rpc::ClientLoaded,
        }
    }

    #[test]
    fn test_scope_predicate() {
        use RoleKind::*;

        assert!(Scope::ToAll.admits(Proxy, Proxy, true));
        assert!(Scope::ToAuthority.admits(Proxy, Authority, false));
        assert!(!Scope::ToAuthority.admits(Authority, Proxy, false));
        assert!(!Scope::ToAllExceptSender.admits(Proxy, Proxy, true));
        assert!(Scope::ToAllExceptSender.admits(Proxy, Authority, false));
        assert!(Scope::ToAllFromAuthority.admits(Authority, Proxy, false));
        assert!(!Scope::ToAllFromAuthority.admits(Proxy, Proxy, false));
    }

    #[test]
    fn test_authority_signal_to_itself_stays_local() {
        let mut channel = AuthorityChannel::new(RoleKind::Authority, 0);
        channel.send(Scope::ToAuthority, Rpc::ClientLoaded);

        assert!(channel.drain_outgoing().is_empty());
        let local = channel.next_incoming().unwrap();
        assert_eq!(local.sender, 0);
        assert_eq!(local.payload, Rpc::ClientLoaded);
    }

    #[test]
    fn test_authority_broadcast_is_delivered_locally_and_remotely() {
        let mut channel = AuthorityChannel::new(RoleKind::Authority, 0);
        channel.send(Scope::ToAllFromAuthority, Rpc::EnterLevel);

        assert_eq!(channel.drain_outgoing().len(), 1);
        assert!(channel.next_incoming().is_some());
    }

    #[test]
    fn test_proxy_request_goes_remote_only() {
        let mut channel = AuthorityChannel::new(RoleKind::Proxy, 4);
        channel.send(Scope::ToAuthority, Rpc::ClientLoaded);

        assert!(!channel.has_incoming());
        let outgoing = channel.drain_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].exclude, None);
    }

    #[test]
    fn test_proxy_except_sender_skips_local_delivery() {
        let mut channel = AuthorityChannel::new(RoleKind::Proxy, 4);
        channel.send(Scope::ToAllExceptSender, Rpc::ClientLoaded);

        assert!(!channel.has_incoming());
        assert_eq!(channel.drain_outgoing().len(), 1);
    }

    #[test]
    fn test_authority_relays_proxy_broadcast_excluding_sender() {
        let mut channel = AuthorityChannel::new(RoleKind::Authority, 0);
        channel.receive(envelope(2, RoleKind::Proxy, Scope::ToAll));

        let outgoing = channel.drain_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].exclude, Some(2));
        assert!(channel.next_incoming().is_some());
    }

    #[test]
    fn test_authority_rejects_forged_authority_broadcast() {
        let mut channel = AuthorityChannel::new(RoleKind::Authority, 0);
        channel.receive(envelope(2, RoleKind::Authority, Scope::ToAllFromAuthority));

        assert!(!channel.has_incoming());
        assert!(channel.drain_outgoing().is_empty());
    }

    #[test]
    fn test_proxy_drops_requests_meant_for_authority() {
        let mut channel = AuthorityChannel::new(RoleKind::Proxy, 5);
        channel.receive(envelope(3, RoleKind::Proxy, Scope::ToAuthority));
        assert!(!channel.has_incoming());

        channel.receive(envelope(0, RoleKind::Authority, Scope::ToAllFromAuthority));
        assert!(channel.has_incoming());
    }
}

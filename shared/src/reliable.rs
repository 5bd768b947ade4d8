//! Acknowledged, ordered envelope delivery over datagrams
//!
//! Every envelope whose payload [`Rpc::is_reliable`] gets a per-connection
//! sequence number and stays in a [`ReliableOutbox`] until the peer acks it.
//! The receiving [`OrderedInbox`] drops duplicates and holds back anything
//! that arrives ahead of a gap, so the session sees reliable envelopes in the
//! order they were sent. Transform updates skip all of this; the periodic
//! reconciliation snapshot covers their losses.

use crate::channel::Envelope;
use crate::protocol::Packet;
use log::warn;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// How long an unacknowledged envelope waits before it is sent again
pub const RESEND_INTERVAL: Duration = Duration::from_millis(150);

/// Envelopes an inbox holds back while waiting for a gap to fill
pub const MAX_BUFFERED: usize = 1024;

#[derive(Debug)]
struct Pending {
    envelope: Envelope,
    sent_at: Instant,
}

/// Sending half of one connection's reliable stream
#[derive(Debug, Default)]
pub struct ReliableOutbox {
    next_seq: u32,
    pending: BTreeMap<u32, Pending>,
}

impl ReliableOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an envelope for the wire, sequencing it when its payload must arrive
    pub fn pack(&mut self, envelope: Envelope) -> Packet {
        if !envelope.payload.is_reliable() {
            return Packet::Rpc(envelope);
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert(
            seq,
            Pending {
                envelope: envelope.clone(),
                sent_at: Instant::now(),
            },
        );
        Packet::ReliableRpc { seq, envelope }
    }

    /// Returns false for unknown or already acknowledged sequence numbers
    pub fn ack(&mut self, seq: u32) -> bool {
        self.pending.remove(&seq).is_some()
    }

    /// Packets unacknowledged for longer than `after`, oldest first
    pub fn due(&mut self, now: Instant, after: Duration) -> Vec<Packet> {
        self.pending
            .iter_mut()
            .filter(|(_, pending)| now.saturating_duration_since(pending.sent_at) >= after)
            .map(|(seq, pending)| {
                pending.sent_at = now;
                Packet::ReliableRpc {
                    seq: *seq,
                    envelope: pending.envelope.clone(),
                }
            })
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Receiving half of one connection's reliable stream
#[derive(Debug, Default)]
pub struct OrderedInbox {
    next_expected: u32,
    buffered: BTreeMap<u32, Envelope>,
}

impl OrderedInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a sequenced envelope and returns everything now deliverable in order
    pub fn accept(&mut self, seq: u32, envelope: Envelope) -> Vec<Envelope> {
        if seq < self.next_expected || self.buffered.contains_key(&seq) {
            return Vec::new();
        }
        if self.buffered.len() >= MAX_BUFFERED {
            warn!("Reliable stream gap at {} never filled, dropping {}", self.next_expected, seq);
            return Vec::new();
        }
        self.buffered.insert(seq, envelope);

        let mut ready = Vec::new();
        while let Some(envelope) = self.buffered.remove(&self.next_expected) {
            ready.push(envelope);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        ready
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }
}

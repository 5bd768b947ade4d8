//! Participant roster, liveness and the single-survivor rule

use crate::error::RosterError;
use crate::protocol::{EntityRef, ParticipantId};
use log::info;
use std::collections::{BTreeMap, BTreeSet};

/// Color names indexed by participant slot
pub const PALETTE: [&str; 8] = [
    "Red", "Blue", "Green", "Yellow", "Purple", "Orange", "Cyan", "Pink",
];

pub fn color_name(slot: u8) -> &'static str {
    PALETTE.get(slot as usize).copied().unwrap_or("Grey")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub slot: u8,
    alive: bool,
}

impl Participant {
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn color(&self) -> &'static str {
        color_name(self.slot)
    }

    /// The avatar is owned by the world, this is only a handle
    pub fn avatar(&self) -> EntityRef {
        EntityRef::Avatar(self.id)
    }
}

#[derive(Debug, Default)]
pub struct RosterManager {
    participants: BTreeMap<ParticipantId, Participant>,
    alive: BTreeSet<ParticipantId>,
    /// Winner already reported for this round
    declared: Option<ParticipantId>,
}

impl RosterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a participant on the lowest free slot
    pub fn add_participant(&mut self, id: ParticipantId) -> Result<u8, RosterError> {
        if self.participants.contains_key(&id) {
            return Err(RosterError::Duplicate(id));
        }

        let taken: BTreeSet<u8> = self.participants.values().map(|p| p.slot).collect();
        let slot = (0..PALETTE.len() as u8)
            .find(|slot| !taken.contains(slot))
            .ok_or(RosterError::Full)?;

        self.insert(id, slot);
        info!("Participant {} joined as {}", id, color_name(slot));
        Ok(slot)
    }

    /// Mirrors a participant whose slot and liveness the authority already decided
    pub fn insert_with_slot(&mut self, id: ParticipantId, slot: u8, alive: bool) {
        if self.participants.get(&id).map(|p| p.slot) != Some(slot) {
            self.insert(id, slot);
        }

        if let Some(participant) = self.participants.get_mut(&id) {
            participant.alive = alive;
        }
        if alive {
            self.alive.insert(id);
        } else {
            self.alive.remove(&id);
        }
    }

    fn insert(&mut self, id: ParticipantId, slot: u8) {
        self.participants.insert(
            id,
            Participant {
                id,
                slot,
                alive: true,
            },
        );
        self.alive.insert(id);
    }

    /// Removes a participant. Returns the winner if the departure leaves a single survivor.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<ParticipantId> {
        self.participants.remove(&id)?;
        self.alive.remove(&id);
        info!("Participant {} left", id);
        self.evaluate_winner()
    }

    /// Marks a participant as eliminated. Returns the winner the first time a single survivor remains.
    pub fn eliminate(&mut self, id: ParticipantId) -> Option<ParticipantId> {
        if !self.alive.remove(&id) {
            return None;
        }
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.alive = false;
        }
        info!("Participant {} eliminated, {} alive", id, self.alive.len());
        self.evaluate_winner()
    }

    fn evaluate_winner(&mut self) -> Option<ParticipantId> {
        if self.declared.is_some() || self.alive.len() != 1 || self.participants.len() <= 1 {
            return None;
        }

        let winner = self.alive.iter().next().copied()?;
        self.declared = Some(winner);
        Some(winner)
    }

    /// Revives everyone and clears the declared winner, once per level load
    pub fn reset_all(&mut self) {
        self.alive = self.participants.keys().copied().collect();
        for participant in self.participants.values_mut() {
            participant.alive = true;
        }
        self.declared = None;
    }

    pub fn winner_if_any(&self) -> Option<&Participant> {
        self.declared.and_then(|id| self.participants.get(&id))
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn is_alive(&self, id: ParticipantId) -> bool {
        self.alive.contains(&id)
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_of(ids: &[ParticipantId]) -> RosterManager {
        let mut roster = RosterManager::new();
        for id in ids {
            roster.add_participant(*id).unwrap();
        }
        roster
    }

    #[test]
    fn test_slots_are_unique_and_reused() {
        let mut roster = roster_of(&[1, 2, 3]);
        assert_eq!(roster.get(1).unwrap().slot, 0);
        assert_eq!(roster.get(3).unwrap().slot, 2);

        roster.remove_participant(2);
        assert_eq!(roster.add_participant(4), Ok(1));
        assert_eq!(roster.get(4).unwrap().color(), "Blue");
    }

    #[test]
    fn test_duplicate_and_full_roster() {
        let mut roster = roster_of(&[1]);
        assert_eq!(roster.add_participant(1), Err(RosterError::Duplicate(1)));

        let mut full = roster_of(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(full.add_participant(9), Err(RosterError::Full));
    }

    #[test]
    fn test_winner_fires_exactly_once() {
        let mut roster = roster_of(&[1, 2, 3, 4]);

        assert_eq!(roster.eliminate(1), None);
        assert_eq!(roster.eliminate(2), None);
        assert_eq!(roster.eliminate(3), Some(4));
        assert_eq!(roster.winner_if_any().map(|p| p.id), Some(4));

        // Nothing else can trigger it before the next reset
        assert_eq!(roster.eliminate(4), None);
        assert_eq!(roster.eliminate(3), None);
    }

    #[test]
    fn test_second_round_after_reset() {
        let mut roster = roster_of(&[1, 2]);
        assert_eq!(roster.eliminate(2), Some(1));

        roster.reset_all();
        assert_eq!(roster.alive_count(), 2);
        assert!(roster.winner_if_any().is_none());
        assert_eq!(roster.eliminate(1), Some(2));
    }

    #[test]
    fn test_solo_participant_never_wins() {
        let mut roster = roster_of(&[1]);
        assert_eq!(roster.eliminate(1), None);
        assert!(roster.winner_if_any().is_none());
    }

    #[test]
    fn test_mirror_keeps_authority_liveness() {
        let mut mirror = RosterManager::new();
        mirror.insert_with_slot(1, 0, true);
        mirror.insert_with_slot(2, 1, false);
        assert!(mirror.is_alive(1));
        assert!(!mirror.is_alive(2));
        assert!(!mirror.get(2).unwrap().is_alive());

        // A repeated catch-up for a known participant still updates liveness
        mirror.insert_with_slot(1, 0, false);
        assert_eq!(mirror.alive_count(), 0);
        assert_eq!(mirror.len(), 2);
    }

    #[test]
    fn test_departure_can_leave_a_winner() {
        let mut roster = roster_of(&[1, 2, 3]);
        assert_eq!(roster.eliminate(1), None);
        assert_eq!(roster.remove_participant(2), Some(3));
    }

    #[test]
    fn test_eliminating_twice_is_ignored() {
        let mut roster = roster_of(&[1, 2, 3]);
        assert_eq!(roster.eliminate(1), None);
        assert_eq!(roster.eliminate(1), None);
        assert_eq!(roster.alive_count(), 2);
    }
}

//! Participant selection.
//!
//! Keys and validators are passed in as immutable snapshots so that every node replaying the
//! same block derives the same committee.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TssError};
use crate::types::{KeyId, ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareHolder {
    pub participant: ParticipantId,
    pub weight: u64,
}

/// A key produced by a prior key-generation ceremony.
///
/// A holder's position in `holders` is the index of its key share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: KeyId,
    pub threshold: u64,
    pub holders: Vec<ShareHolder>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRegistry {
    keys: BTreeMap<KeyId, KeyInfo>,
}

impl KeyRegistry {
    pub fn new(keys: impl IntoIterator<Item = KeyInfo>) -> Self {
        KeyRegistry {
            keys: keys.into_iter().map(|k| (k.id.clone(), k)).collect(),
        }
    }

    /// Looks up an active key.
    pub fn resolve(&self, key_id: &KeyId) -> Result<&KeyInfo> {
        match self.keys.get(key_id) {
            Some(info) if !info.revoked => Ok(info),
            _ => Err(TssError::UnknownKey(key_id.clone())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyInfo> {
        self.keys.values()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ParticipantId,
    pub active: bool,
}

/// Validator set as of a given block height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSnapshot {
    pub height: u64,
    pub validators: Vec<Validator>,
}

impl ValidatorSnapshot {
    pub fn new(height: u64, validators: Vec<Validator>) -> Self {
        ValidatorSnapshot { height, validators }
    }

    fn active_ids(&self) -> BTreeSet<&ParticipantId> {
        self.validators
            .iter()
            .filter(|v| v.active)
            .map(|v| &v.id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedParticipant {
    pub participant: ParticipantId,
    pub weight: u64,
    pub share_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAssignment {
    pub key_id: KeyId,
    pub snapshot_height: u64,
    pub threshold: u64,
    /// Sorted by participant identity.
    pub participants: Vec<AssignedParticipant>,
}

impl ParticipantAssignment {
    pub fn get(&self, participant: &ParticipantId) -> Option<&AssignedParticipant> {
        self.participants
            .binary_search_by(|p| p.participant.cmp(participant))
            .ok()
            .map(|i| &self.participants[i])
    }

    pub fn weight_of(&self, participant: &ParticipantId) -> Option<u64> {
        self.get(participant).map(|p| p.weight)
    }

    pub fn total_weight(&self) -> u64 {
        self.participants
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.weight))
    }

    /// Participants strictly increasing by identity, the order [`select`] produces and
    /// [`ParticipantAssignment::get`] relies on.
    pub fn is_canonical(&self) -> bool {
        self.participants
            .windows(2)
            .all(|pair| pair[0].participant < pair[1].participant)
    }
}

/// Derives the committee for `key_id` from the given snapshots.
pub fn select(
    keys: &KeyRegistry,
    key_id: &KeyId,
    validators: &ValidatorSnapshot,
) -> Result<ParticipantAssignment> {
    let key = keys.resolve(key_id)?;
    if key.threshold == 0 {
        return Err(TssError::InvalidThreshold {
            key: key_id.clone(),
            threshold: key.threshold,
        });
    }

    let active = validators.active_ids();
    let mut eligible: BTreeMap<&ParticipantId, AssignedParticipant> = BTreeMap::new();
    for (index, holder) in key.holders.iter().enumerate() {
        if holder.weight == 0 || !active.contains(&holder.participant) {
            continue;
        }
        // a participant listed twice keeps its first share
        eligible
            .entry(&holder.participant)
            .or_insert_with(|| AssignedParticipant {
                participant: holder.participant.clone(),
                weight: holder.weight,
                share_index: index as u32,
            });
    }

    let participants: Vec<_> = eligible.into_values().collect();
    let available = participants
        .iter()
        .fold(0u64, |acc, p| acc.saturating_add(p.weight));
    if available < key.threshold {
        debug!(
            key = %key_id,
            available,
            required = key.threshold,
            "not enough eligible share holders"
        );
        return Err(TssError::InsufficientParticipants {
            available,
            required: key.threshold,
        });
    }

    Ok(ParticipantAssignment {
        key_id: key_id.clone(),
        snapshot_height: validators.height,
        threshold: key.threshold,
        participants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(id: &str, weight: u64) -> ShareHolder {
        ShareHolder {
            participant: ParticipantId::new(id),
            weight,
        }
    }

    fn validator(id: &str, active: bool) -> Validator {
        Validator {
            id: ParticipantId::new(id),
            active,
        }
    }

    fn registry(threshold: u64, holders: Vec<ShareHolder>) -> KeyRegistry {
        KeyRegistry::new(vec![KeyInfo {
            id: KeyId::new("master"),
            threshold,
            holders,
            revoked: false,
        }])
    }

    #[test]
    fn orders_by_identity_and_keeps_share_index() {
        let keys = registry(2, vec![holder("carol", 1), holder("alice", 2), holder("bob", 1)]);
        let snapshot = ValidatorSnapshot::new(
            7,
            vec![
                validator("bob", true),
                validator("carol", true),
                validator("alice", true),
            ],
        );
        let assignment = select(&keys, &KeyId::new("master"), &snapshot).unwrap();
        let order: Vec<_> = assignment
            .participants
            .iter()
            .map(|p| (p.participant.as_str(), p.share_index))
            .collect();
        assert_eq!(order, vec![("alice", 1), ("bob", 2), ("carol", 0)]);
        assert_eq!(assignment.snapshot_height, 7);
        assert_eq!(assignment.total_weight(), 4);
        assert_eq!(assignment.weight_of(&ParticipantId::new("alice")), Some(2));
        assert_eq!(assignment.weight_of(&ParticipantId::new("dave")), None);
        assert!(assignment.is_canonical());

        let mut shuffled = assignment.clone();
        shuffled.participants.swap(0, 2);
        assert!(!shuffled.is_canonical());
        let mut repeated = assignment;
        repeated.participants[1] = repeated.participants[0].clone();
        assert!(!repeated.is_canonical());
    }

    #[test]
    fn selection_ignores_snapshot_order() {
        let keys = registry(2, vec![holder("a", 1), holder("b", 1), holder("c", 1)]);
        let forward = ValidatorSnapshot::new(
            1,
            vec![validator("a", true), validator("b", true), validator("c", true)],
        );
        let mut reversed = forward.clone();
        reversed.validators.reverse();
        assert_eq!(
            select(&keys, &KeyId::new("master"), &forward).unwrap(),
            select(&keys, &KeyId::new("master"), &reversed).unwrap()
        );
    }

    #[test]
    fn inactive_and_absent_holders_are_excluded() {
        let keys = registry(2, vec![holder("a", 1), holder("b", 1), holder("c", 1)]);
        let snapshot = ValidatorSnapshot::new(1, vec![validator("a", true), validator("b", false)]);
        let err = select(&keys, &KeyId::new("master"), &snapshot).unwrap_err();
        assert_eq!(
            err,
            TssError::InsufficientParticipants {
                available: 1,
                required: 2
            }
        );
    }

    #[test]
    fn unknown_revoked_and_zero_threshold_keys() {
        let snapshot = ValidatorSnapshot::new(1, vec![validator("a", true)]);
        let keys = registry(1, vec![holder("a", 1)]);
        assert!(matches!(
            select(&keys, &KeyId::new("other"), &snapshot),
            Err(TssError::UnknownKey(_))
        ));

        let revoked = KeyRegistry::new(vec![KeyInfo {
            id: KeyId::new("master"),
            threshold: 1,
            holders: vec![holder("a", 1)],
            revoked: true,
        }]);
        assert!(matches!(
            select(&revoked, &KeyId::new("master"), &snapshot),
            Err(TssError::UnknownKey(_))
        ));

        let zero = registry(0, vec![holder("a", 1)]);
        assert!(matches!(
            select(&zero, &KeyId::new("master"), &snapshot),
            Err(TssError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn duplicate_holder_keeps_first_share() {
        let keys = registry(1, vec![holder("a", 3), holder("a", 5)]);
        let snapshot = ValidatorSnapshot::new(1, vec![validator("a", true)]);
        let assignment = select(&keys, &KeyId::new("master"), &snapshot).unwrap();
        assert_eq!(assignment.participants.len(), 1);
        assert_eq!(assignment.participants[0].share_index, 0);
        assert_eq!(assignment.participants[0].weight, 3);
    }
}

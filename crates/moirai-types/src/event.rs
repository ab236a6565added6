use crate::validator::{Sequence, Timestamp, ValidatorId, Weight};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of an event in the DAG: `(creator, sequence)`.
///
/// Equivocating validators can publish two distinct events under the same
/// `EventId`; those are told apart by the per-event [`Uuid`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[display(fmt = "{}#{}", creator, seq)]
pub struct EventId {
    pub creator: ValidatorId,
    pub seq: Sequence,
}

impl EventId {
    pub fn new(creator: impl Into<ValidatorId>, seq: Sequence) -> Self {
        Self {
            creator: creator.into(),
            seq,
        }
    }
}

/// Reference to an observing event: its uuid and its sequence number.
///
/// Used in the lowest-observing vector (the observer validator is the map
/// key, so the full `EventId` is recoverable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub uuid: Uuid,
    pub seq: Sequence,
}

/// A DAG event: immutable identity plus the annotations derived at ingest.
///
/// Identity (uuid, id, parents, timestamp, weight) is fixed at creation and
/// is all that travels between instances; the remaining fields are filled in
/// by each engine as it processes the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier, distinguishing equivocations.
    pub uuid: Uuid,
    /// `(creator, sequence)` identity.
    pub id: EventId,
    /// Parent references by uuid; the self-parent, if any, is the entry
    /// matching `(creator, seq - 1)`.
    pub parents: Vec<Uuid>,
    /// Logical creation time.
    pub timestamp: Timestamp,
    /// Stake of the creator declared at creation.
    pub weight: Weight,

    /// Frame assigned by the engine; unknown until processed.
    pub frame: Option<u64>,
    pub is_root: bool,
    pub is_atropos: bool,
    /// Per validator, the largest sequence of that validator's events in
    /// this event's past (including the event itself for its own creator).
    pub highest_observed: HashMap<ValidatorId, Sequence>,
    /// Per observer validator, the earliest descendant by that validator
    /// which transitively cites this event. Written onto ancestors as new
    /// events arrive.
    pub lowest_observing: HashMap<ValidatorId, EventRef>,
    /// Fork-walk markers: observers whose ancestry traversal already
    /// crossed this event.
    pub visited_by: HashMap<ValidatorId, EventRef>,
    /// Per validator, the latest creation timestamp observed in this
    /// event's past.
    pub highest_timestamps: HashMap<ValidatorId, Timestamp>,
}

impl Event {
    /// Create an event with a fresh random uuid.
    pub fn new(
        creator: impl Into<ValidatorId>,
        seq: Sequence,
        timestamp: Timestamp,
        weight: Weight,
        parents: Vec<Uuid>,
    ) -> Self {
        Self::with_uuid(Uuid::new_v4(), creator, seq, timestamp, weight, parents)
    }

    /// Create an event with a caller-chosen uuid.
    pub fn with_uuid(
        uuid: Uuid,
        creator: impl Into<ValidatorId>,
        seq: Sequence,
        timestamp: Timestamp,
        weight: Weight,
        parents: Vec<Uuid>,
    ) -> Self {
        Self {
            uuid,
            id: EventId::new(creator, seq),
            parents,
            timestamp,
            weight,
            frame: None,
            is_root: false,
            is_atropos: false,
            highest_observed: HashMap::new(),
            lowest_observing: HashMap::new(),
            visited_by: HashMap::new(),
            highest_timestamps: HashMap::new(),
        }
    }

    pub fn creator(&self) -> &ValidatorId {
        &self.id.creator
    }

    pub fn seq(&self) -> Sequence {
        self.id.seq
    }

    /// A genesis event is the first event of its validator.
    pub fn is_genesis(&self) -> bool {
        self.id.seq == 1
    }

    /// Clone identity only, dropping every derived annotation.
    ///
    /// This is the form an event takes when copied between instances: the
    /// receiving engine re-derives its own annotations.
    pub fn copy_basic(&self) -> Self {
        Self::with_uuid(
            self.uuid,
            self.id.creator.clone(),
            self.id.seq,
            self.timestamp,
            self.weight,
            self.parents.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_display() {
        let id = EventId::new("A", 3);
        assert_eq!(id.to_string(), "A#3");
    }

    #[test]
    fn test_event_id_ordering() {
        // Creator first, then sequence.
        assert!(EventId::new("A", 9) < EventId::new("B", 1));
        assert!(EventId::new("A", 1) < EventId::new("A", 2));
    }

    #[test]
    fn test_copy_basic_strips_annotations() {
        let parent = Event::new("A", 1, 1, 1, vec![]);
        let mut event = Event::new("A", 2, 2, 1, vec![parent.uuid]);
        event.frame = Some(3);
        event.is_root = true;
        event
            .highest_observed
            .insert(ValidatorId::new("A"), 2);

        let copy = event.copy_basic();
        assert_eq!(copy.uuid, event.uuid);
        assert_eq!(copy.id, event.id);
        assert_eq!(copy.parents, event.parents);
        assert_eq!(copy.frame, None);
        assert!(!copy.is_root);
        assert!(copy.highest_observed.is_empty());
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = Event::with_uuid(Uuid::from_u128(7), "B", 4, 10, 2, vec![]);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}

//! Equivocation detection.
//!
//! Four detections run on every ingested event: a non-monotone
//! self-sequence, duplicate parent references, self-citation, and duplicate
//! sequence numbers discovered while walking the event's ancestry. Each
//! offense is recorded as an accusation in the registry under the creator
//! of the event exposing the evidence; promotion to confirmed cheater is
//! the registry's quorum rule.

use crate::registry::ValidatorRegistry;
use crate::store::EventStore;
use moirai_types::{EventRef, Sequence, ValidatorId};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Per-instance fork bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ForkDetector {
    /// Highest self-sequence ingested per validator.
    last_seq: HashMap<ValidatorId, Sequence>,
    /// Observer -> creator -> sequence numbers its walks have crossed.
    /// A repeat under the same observer means two distinct events share a
    /// sequence number.
    observed_sequences: HashMap<ValidatorId, HashMap<ValidatorId, HashSet<Sequence>>>,
}

impl ForkDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a freshly stored event. Returns true when new fork evidence
    /// was recorded (the caller then invalidates quorum caches).
    pub fn inspect(
        &mut self,
        store: &mut EventStore,
        registry: &mut ValidatorRegistry,
        uuid: Uuid,
    ) -> bool {
        let Some(event) = store.get(&uuid) else {
            return false;
        };
        let creator = event.id.creator.clone();
        let seq = event.id.seq;
        let parents = event.parents.clone();
        let mut tainted = false;

        // Self-citation.
        if parents.contains(&uuid) {
            tainted |= registry.suspect(creator.clone(), creator.clone());
        }

        // Duplicate parent references mark the duplicated parent's creator.
        let mut seen = HashSet::new();
        for parent_uuid in &parents {
            if !seen.insert(*parent_uuid) {
                if let Some(parent) = store.get(parent_uuid) {
                    let offender = parent.id.creator.clone();
                    tainted |= registry.suspect(creator.clone(), offender);
                }
            }
        }

        // Non-monotone self-sequence.
        match self.last_seq.get(&creator) {
            Some(last) if *last >= seq => {
                tainted |= registry.suspect(creator.clone(), creator.clone());
            }
            _ => {
                self.last_seq.insert(creator.clone(), seq);
            }
        }

        // Walk the ancestry once per observer, recording sequence numbers;
        // a repeat means two distinct ancestors share one.
        let marker = EventRef { uuid, seq };
        let mut queue: VecDeque<Uuid> = parents.into_iter().collect();
        while let Some(ancestor_uuid) = queue.pop_front() {
            let Some(ancestor) = store.get_mut(&ancestor_uuid) else {
                continue;
            };
            if ancestor.visited_by.contains_key(&creator) {
                continue;
            }
            ancestor.visited_by.insert(creator.clone(), marker);
            let ancestor_creator = ancestor.id.creator.clone();
            let ancestor_seq = ancestor.id.seq;
            let ancestor_parents = ancestor.parents.clone();

            let sequences = self
                .observed_sequences
                .entry(creator.clone())
                .or_default()
                .entry(ancestor_creator.clone())
                .or_default();
            if sequences.insert(ancestor_seq) {
                queue.extend(ancestor_parents);
            } else {
                tainted |= registry.suspect(creator.clone(), ancestor_creator);
            }
        }

        if tainted {
            tracing::debug!("fork evidence recorded while ingesting {}#{}", creator, seq);
        }
        tainted
    }
}

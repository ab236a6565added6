//! The single-instance consensus engine.
//!
//! Composes the registry, fork detector, causal-history index, frame/root
//! assigner, and atropos election into the per-event ingest pipeline. The
//! engine assumes every parent of an ingested event is already stored; the
//! multi-instance coordinator upholds that, and direct callers get a
//! `MissingAncestor` fault otherwise.

use crate::causality;
use crate::election::{Election, RootSet};
use crate::error::ConsensusError;
use crate::forks::ForkDetector;
use crate::registry::{EngineConfig, ValidatorRegistry};
use crate::store::EventStore;
use moirai_types::{Event, EventId, Timestamp, ValidatorId, Weight};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A Lachesis-style engine: one validator's view of the event DAG and the
/// consensus state derived from it.
#[derive(Debug, Clone)]
pub struct Lachesis {
    /// The validator this instance belongs to, if any; a standalone engine
    /// has no identity of its own.
    validator: Option<ValidatorId>,
    store: EventStore,
    registry: ValidatorRegistry,
    forks: ForkDetector,
    election: Election,
    root_sets: BTreeMap<u64, RootSet>,
    /// Highest frame observed.
    frame: u64,
    /// Per-instance logical clock.
    time: Timestamp,
    /// Events materialized by this instance.
    ingested: u64,
}

impl Lachesis {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            validator: None,
            store: EventStore::new(),
            registry: ValidatorRegistry::new(config),
            forks: ForkDetector::new(),
            election: Election::new(),
            root_sets: BTreeMap::new(),
            frame: 1,
            time: 0,
            ingested: 0,
        }
    }

    /// An engine owned by one validator of a multi-instance deployment.
    pub fn for_validator(validator: ValidatorId, config: EngineConfig) -> Self {
        Self {
            validator: Some(validator),
            ..Self::with_config(config)
        }
    }

    pub fn validator(&self) -> Option<&ValidatorId> {
        self.validator.as_ref()
    }

    /// Seed the registry with an initial validator (or refresh its stake).
    pub fn register_validator(&mut self, validator: &ValidatorId, weight: Weight) {
        self.registry.declare(validator, weight);
    }

    /// Ingest one event. All parents must already be stored.
    ///
    /// Re-ingesting a stored uuid is a no-op. Fails with `ConsensusHalted`
    /// once every registered validator's weight has reached zero.
    pub fn ingest(&mut self, event: Event) -> Result<(), ConsensusError> {
        if self.store.contains(&event.uuid) {
            return Ok(());
        }
        if self.registry.is_halted() {
            return Err(ConsensusError::ConsensusHalted);
        }
        for parent in &event.parents {
            // A self-citing parent resolves to the event itself; the fork
            // detector deals with it.
            if *parent != event.uuid && !self.store.contains(parent) {
                return Err(ConsensusError::MissingAncestor {
                    child: event.id.clone(),
                    parent: *parent,
                });
            }
        }

        let uuid = event.uuid;
        let creator = event.id.creator.clone();
        self.registry.declare(&creator, event.weight);
        self.store.insert(event);
        self.ingested += 1;

        if self.forks.inspect(&mut self.store, &mut self.registry, uuid) {
            self.registry.invalidate_from(self.frame);
        }

        causality::merge_highest_observed(&mut self.store, &self.registry, uuid);
        causality::stamp_lowest_observing(&mut self.store, &self.registry, uuid);
        causality::merge_highest_timestamps(&mut self.store, &mut self.registry, uuid);

        self.assign_frame(uuid, creator);
        Ok(())
    }

    /// Convenience driver: order events by `(timestamp, id, uuid)` and
    /// ingest them in turn, advancing the clock across timestamp buckets.
    ///
    /// The whole stream's validator set is registered before processing,
    /// so genesis-frame quorums already account for every declared stake.
    pub fn ingest_sorted(&mut self, mut events: Vec<Event>) -> Result<(), ConsensusError> {
        events.sort_by(|a, b| {
            (a.timestamp, &a.id, a.uuid).cmp(&(b.timestamp, &b.id, b.uuid))
        });
        for event in &events {
            self.registry.declare(&event.id.creator, event.weight);
        }
        for event in events {
            self.set_time(event.timestamp);
            self.ingest(event)?;
        }
        Ok(())
    }

    /// Frame/root assignment (and, for roots, the election round).
    fn assign_frame(&mut self, uuid: Uuid, creator: ValidatorId) {
        let seq = match self.store.get(&uuid) {
            Some(event) => event.id.seq,
            None => return,
        };
        if seq == 1 {
            self.promote_root(uuid, 1, creator);
            return;
        }

        let parent_frame = {
            let Some(event) = self.store.get(&uuid) else { return };
            let Some(self_parent) = self.store.self_parent_of(event) else {
                // A sequence gap only a cheater can produce; nothing to
                // anchor a frame to.
                return;
            };
            match self_parent.frame {
                Some(frame) => frame,
                None => return,
            }
        };

        if !self.registry.is_cheater(&creator) && self.forkless_cause_quorum(uuid, parent_frame) {
            self.promote_root(uuid, parent_frame + 1, creator);
        } else if let Some(event) = self.store.get_mut(&uuid) {
            event.frame = Some(parent_frame);
        }
    }

    /// Does this event forkless-cause a quorum (by weight) of the roots of
    /// `frame`?
    fn forkless_cause_quorum(&mut self, uuid: Uuid, frame: u64) -> bool {
        let Some(roots) = self.root_sets.get(&frame) else {
            return false;
        };
        let root_uuids = roots.events.clone();

        let mut observing: Weight = 0;
        for root_uuid in root_uuids {
            let (Some(event), Some(root)) = (self.store.get(&uuid), self.store.get(&root_uuid))
            else {
                continue;
            };
            let root_creator = root.id.creator.clone();
            if causality::forkless_cause(event, root, &mut self.registry, self.time) {
                observing += self.registry.weight(&root_creator);
            }
        }
        observing >= self.registry.quorum(frame, self.time)
    }

    /// Register a root: frame annotation, root-set membership, election.
    /// Known cheaters keep the frame annotation but never join root sets.
    fn promote_root(&mut self, uuid: Uuid, frame: u64, creator: ValidatorId) {
        if let Some(event) = self.store.get_mut(&uuid) {
            event.frame = Some(frame);
        }
        if self.registry.is_cheater(&creator) {
            return;
        }
        if let Some(event) = self.store.get_mut(&uuid) {
            event.is_root = true;
        }
        if self.frame < frame {
            self.frame = frame;
        }

        let root_id = self
            .store
            .get(&uuid)
            .map(|e| e.id.to_string())
            .unwrap_or_default();
        let roots = self.root_sets.entry(frame).or_default();
        let new_frame = roots.events.is_empty();
        roots.events.push(uuid);
        roots.validators.insert(creator.clone());
        tracing::debug!("{} becomes a root of frame {}", root_id, frame);

        if new_frame {
            // Fix the quorum for the freshly opened frame.
            let _ = self.registry.quorum(frame, self.time);
        }

        self.election.on_new_root(
            uuid,
            self.frame,
            &self.root_sets,
            &mut self.store,
            &mut self.registry,
            self.time,
        );
    }

    // --- query surface -----------------------------------------------------

    /// Current highest frame.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// 1 + number of decided atropos roots.
    pub fn block(&self) -> u64 {
        self.election.block()
    }

    /// Smallest frame whose atropos is undetermined.
    pub fn frame_to_decide(&self) -> u64 {
        self.election.frame_to_decide()
    }

    pub fn atropos_of(&self, frame: u64) -> Option<&EventId> {
        self.election.atropos_of(frame)
    }

    pub fn atropos_roots(&self) -> &BTreeMap<u64, EventId> {
        self.election.atropos_roots()
    }

    /// The root events of a frame, as ids.
    pub fn root_set(&self, frame: u64) -> Vec<EventId> {
        self.root_sets
            .get(&frame)
            .map(|roots| {
                roots
                    .events
                    .iter()
                    .filter_map(|uuid| self.store.get(uuid))
                    .map(|event| event.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Creators of a frame's roots.
    pub fn root_validators(&self, frame: u64) -> std::collections::BTreeSet<ValidatorId> {
        self.root_sets
            .get(&frame)
            .map(|roots| roots.validators.clone())
            .unwrap_or_default()
    }

    /// Confirmed cheater?
    pub fn is_cheater(&self, validator: &ValidatorId) -> bool {
        self.registry.is_confirmed(validator)
    }

    /// Canonical stored event for an id.
    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.store.canonical(id)
    }

    pub fn event_by_uuid(&self, uuid: &Uuid) -> Option<&Event> {
        self.store.get(uuid)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.store.contains(uuid)
    }

    /// Quorum threshold for a frame (may fill the cache).
    pub fn quorum(&mut self, frame: u64) -> Weight {
        self.registry.quorum(frame, self.time)
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Advance the clock monotonically.
    pub fn set_time(&mut self, time: Timestamp) {
        if self.time < time {
            self.time = time;
        }
    }

    pub fn advance_time(&mut self) {
        self.time += 1;
    }

    /// Number of events materialized by this instance.
    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }
}

impl Default for Lachesis {
    fn default() -> Self {
        Self::new()
    }
}

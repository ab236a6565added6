//! Event storage.
//!
//! Events are owned uniquely by the store and keyed by uuid, so both
//! branches of an equivocation coexist. An `EventId -> [Uuid]` index serves
//! id-based queries; the first uuid recorded for an id is its canonical
//! version.

use moirai_types::{Event, EventId};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: HashMap<Uuid, Event>,
    by_id: HashMap<EventId, Vec<Uuid>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event; returns false (and leaves the store untouched) if
    /// the uuid is already present.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.uuid) {
            return false;
        }
        self.by_id
            .entry(event.id.clone())
            .or_default()
            .push(event.uuid);
        self.events.insert(event.uuid, event);
        true
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.events.contains_key(uuid)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&Event> {
        self.events.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &Uuid) -> Option<&mut Event> {
        self.events.get_mut(uuid)
    }

    /// The first-seen event for an id (equivocations keep later uuids in
    /// the index but do not displace the canonical version).
    pub fn canonical(&self, id: &EventId) -> Option<&Event> {
        self.by_id
            .get(id)
            .and_then(|uuids| uuids.first())
            .and_then(|uuid| self.events.get(uuid))
    }

    /// Every stored version of an id; more than one means a fork.
    pub fn versions(&self, id: &EventId) -> &[Uuid] {
        self.by_id.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Locate the self-parent by scanning an event's parents for
    /// `(creator, seq - 1)`.
    pub fn self_parent_of(&self, event: &Event) -> Option<&Event> {
        let seq = event.id.seq.checked_sub(1)?;
        event.parents.iter().find_map(|uuid| {
            self.events
                .get(uuid)
                .filter(|p| p.id.creator == event.id.creator && p.id.seq == seq)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

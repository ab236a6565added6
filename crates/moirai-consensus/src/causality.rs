//! Causal-history index maintenance.
//!
//! Two vectors are kept per event: the highest sequence observed per
//! validator in its past, and the lowest event per observer validator that
//! transitively cites it. Together they make the forkless-cause check a
//! single pass over the validator set.

use crate::registry::ValidatorRegistry;
use crate::store::EventStore;
use moirai_types::{Event, EventRef, Sequence, Timestamp, ValidatorId, Weight};
use std::collections::{BTreeSet, HashMap, VecDeque};
use uuid::Uuid;

/// Compute an event's highest-observed vector from its parents.
///
/// The event's own `(creator, seq)` entry is seeded first; parents created
/// by known cheaters contribute nothing.
pub fn merge_highest_observed(store: &mut EventStore, registry: &ValidatorRegistry, uuid: Uuid) {
    let Some(event) = store.get(&uuid) else { return };
    let creator = event.id.creator.clone();
    let seq = event.id.seq;
    let parents = event.parents.clone();

    let mut merged: HashMap<ValidatorId, Sequence> = HashMap::new();
    merged.insert(creator, seq);
    for parent_uuid in parents {
        let Some(parent) = store.get(&parent_uuid) else {
            continue;
        };
        if registry.is_cheater(&parent.id.creator) {
            continue;
        }
        raise(&mut merged, &parent.id.creator, parent.id.seq);
        for (validator, observed) in &parent.highest_observed {
            raise(&mut merged, validator, *observed);
        }
    }

    if let Some(event) = store.get_mut(&uuid) {
        event.highest_observed = merged;
    }
}

/// Stamp a new event onto every ancestor that no other event of the same
/// creator has reached yet.
///
/// Breadth-first from the event's parents; the walk does not re-cross
/// already stamped ancestors, and ancestors created by validators the
/// stamping observer has witnessed equivocating are skipped.
pub fn stamp_lowest_observing(store: &mut EventStore, registry: &ValidatorRegistry, uuid: Uuid) {
    let Some(event) = store.get(&uuid) else { return };
    let observer = event.id.creator.clone();
    let stamp = EventRef {
        uuid,
        seq: event.id.seq,
    };
    let skip: BTreeSet<ValidatorId> = registry
        .accused_by(&observer)
        .cloned()
        .unwrap_or_default();

    let mut queue: VecDeque<Uuid> = event.parents.iter().copied().collect();
    while let Some(ancestor_uuid) = queue.pop_front() {
        let Some(ancestor) = store.get_mut(&ancestor_uuid) else {
            continue;
        };
        if skip.contains(&ancestor.id.creator) {
            continue;
        }
        if ancestor.lowest_observing.contains_key(&observer) {
            continue;
        }
        ancestor.lowest_observing.insert(observer.clone(), stamp);
        queue.extend(ancestor.parents.iter().copied());
    }
}

/// Merge parents' timestamp vectors into the event and fold the result
/// into the registry's liveness view.
pub fn merge_highest_timestamps(
    store: &mut EventStore,
    registry: &mut ValidatorRegistry,
    uuid: Uuid,
) {
    let Some(event) = store.get(&uuid) else { return };
    let parents = event.parents.clone();

    let mut merged: HashMap<ValidatorId, Timestamp> = HashMap::new();
    for parent_uuid in parents {
        let Some(parent) = store.get(&parent_uuid) else {
            continue;
        };
        raise(&mut merged, &parent.id.creator, parent.timestamp);
        for (validator, timestamp) in &parent.highest_timestamps {
            raise(&mut merged, validator, *timestamp);
        }
    }

    for (validator, timestamp) in &merged {
        registry.observe_timestamp(validator, *timestamp);
    }
    if let Some(event) = store.get_mut(&uuid) {
        event.highest_timestamps = merged;
    }
}

/// The forkless-cause relation: `a` observes `b` through a quorum of
/// non-cheating validators.
///
/// False outright when either creator is a confirmed cheater or appears in
/// the other creator's observed-cheater list, or when `b` has no frame yet.
pub fn forkless_cause(
    a: &Event,
    b: &Event,
    registry: &mut ValidatorRegistry,
    now: Timestamp,
) -> bool {
    if registry.is_confirmed(a.creator()) || registry.is_confirmed(b.creator()) {
        return false;
    }
    if registry.accuses(a.creator(), b.creator()) || registry.accuses(b.creator(), a.creator()) {
        return false;
    }
    let Some(frame) = b.frame else {
        return false;
    };

    let mut observing: Weight = 0;
    for (validator, observed) in &a.highest_observed {
        if let Some(lowest) = b.lowest_observing.get(validator) {
            if lowest.seq <= *observed {
                observing += registry.weight(validator);
            }
        }
    }
    observing >= registry.quorum(frame, now)
}

fn raise<K: Clone + Eq + std::hash::Hash>(map: &mut HashMap<K, u64>, key: &K, value: u64) {
    let entry = map.entry(key.clone()).or_insert(value);
    if *entry < value {
        *entry = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EngineConfig;

    fn vid(s: &str) -> ValidatorId {
        ValidatorId::new(s)
    }

    fn ev(n: u128, creator: &str, seq: u64, parents: Vec<Uuid>) -> Event {
        Event::with_uuid(Uuid::from_u128(n), creator, seq, seq, 1, parents)
    }

    fn registry_of(validators: &[&str]) -> ValidatorRegistry {
        let mut registry = ValidatorRegistry::new(EngineConfig::default());
        for v in validators {
            registry.declare(&vid(v), 1);
        }
        registry
    }

    #[test]
    fn test_highest_observed_includes_self() {
        let mut store = EventStore::new();
        let registry = registry_of(&["A"]);
        let a1 = ev(1, "A", 1, vec![]);
        let uuid = a1.uuid;
        store.insert(a1);
        merge_highest_observed(&mut store, &registry, uuid);

        let a1 = store.get(&uuid).unwrap();
        assert_eq!(a1.highest_observed.get(&vid("A")), Some(&1));
    }

    #[test]
    fn test_highest_observed_merges_parents() {
        let mut store = EventStore::new();
        let registry = registry_of(&["A", "B"]);
        let a1 = ev(1, "A", 1, vec![]);
        let b1 = ev(2, "B", 1, vec![]);
        let a2 = ev(3, "A", 2, vec![a1.uuid, b1.uuid]);
        let uuid = a2.uuid;
        for e in [a1, b1, a2] {
            let u = e.uuid;
            store.insert(e);
            merge_highest_observed(&mut store, &registry, u);
        }

        let a2 = store.get(&uuid).unwrap();
        assert_eq!(a2.highest_observed.get(&vid("A")), Some(&2));
        assert_eq!(a2.highest_observed.get(&vid("B")), Some(&1));
    }

    #[test]
    fn test_cheater_parent_contributes_nothing() {
        let mut store = EventStore::new();
        let mut registry = registry_of(&["A", "B"]);
        registry.suspect(vid("B"), vid("A"));

        let a1 = ev(1, "A", 1, vec![]);
        let b2 = ev(2, "B", 2, vec![a1.uuid]);
        let uuid = b2.uuid;
        store.insert(a1);
        store.insert(b2);
        merge_highest_observed(&mut store, &registry, uuid);

        let b2 = store.get(&uuid).unwrap();
        assert_eq!(b2.highest_observed.get(&vid("A")), None);
        assert_eq!(b2.highest_observed.get(&vid("B")), Some(&2));
    }

    #[test]
    fn test_lowest_observing_first_stamp_wins() {
        let mut store = EventStore::new();
        let registry = registry_of(&["A"]);
        let a1 = ev(1, "A", 1, vec![]);
        let a2 = ev(2, "A", 2, vec![a1.uuid]);
        let a3 = ev(3, "A", 3, vec![a2.uuid]);
        let (u1, u2, u3) = (a1.uuid, a2.uuid, a3.uuid);
        for e in [a1, a2, a3] {
            let u = e.uuid;
            store.insert(e);
            stamp_lowest_observing(&mut store, &registry, u);
        }

        // A2 stamped A1 first; A3 then stamped A2 and left A1 alone.
        assert_eq!(
            store.get(&u1).unwrap().lowest_observing.get(&vid("A")),
            Some(&EventRef { uuid: u2, seq: 2 })
        );
        assert_eq!(
            store.get(&u2).unwrap().lowest_observing.get(&vid("A")),
            Some(&EventRef { uuid: u3, seq: 3 })
        );
    }

    #[test]
    fn test_stamping_skips_accused_ancestors() {
        let mut store = EventStore::new();
        let mut registry = registry_of(&["A", "B"]);
        registry.suspect(vid("B"), vid("A"));

        let a1 = ev(1, "A", 1, vec![]);
        let b2 = ev(2, "B", 2, vec![a1.uuid]);
        let u1 = a1.uuid;
        let u2 = b2.uuid;
        store.insert(a1);
        store.insert(b2);
        stamp_lowest_observing(&mut store, &registry, u2);

        assert!(store.get(&u1).unwrap().lowest_observing.is_empty());
    }

    #[test]
    fn test_timestamps_fold_into_registry() {
        let mut store = EventStore::new();
        let mut registry = registry_of(&["A", "B"]);
        let a1 = Event::with_uuid(Uuid::from_u128(1), "A", 1, 5, 1, vec![]);
        let b1 = Event::with_uuid(Uuid::from_u128(2), "B", 1, 7, 1, vec![a1.uuid]);
        let u2 = b1.uuid;
        store.insert(a1);
        store.insert(b1);
        merge_highest_timestamps(&mut store, &mut registry, u2);

        assert_eq!(registry.last_observed(&vid("A")), Some(5));
        // B's own timestamp only enters once a descendant observes it.
        assert_eq!(registry.last_observed(&vid("B")), None);
    }

    #[test]
    fn test_forkless_cause_weighs_observers() {
        let mut store = EventStore::new();
        let mut registry = registry_of(&["A", "B", "C"]);

        let mut b = ev(1, "B", 1, vec![]);
        b.frame = Some(1);
        b.lowest_observing
            .insert(vid("A"), EventRef { uuid: Uuid::from_u128(9), seq: 2 });
        b.lowest_observing
            .insert(vid("B"), EventRef { uuid: Uuid::from_u128(8), seq: 2 });

        let mut a = ev(2, "A", 3, vec![]);
        a.highest_observed.insert(vid("A"), 3);
        a.highest_observed.insert(vid("B"), 2);
        store.insert(b.clone());
        store.insert(a.clone());

        // Only A and B observe: weight 2 < quorum 3.
        assert!(!forkless_cause(&a, &b, &mut registry, 0));

        // A third observer tips the scale.
        b.lowest_observing
            .insert(vid("C"), EventRef { uuid: Uuid::from_u128(7), seq: 1 });
        a.highest_observed.insert(vid("C"), 1);
        assert!(forkless_cause(&a, &b, &mut registry, 0));
    }

    #[test]
    fn test_forkless_cause_rejects_accused_pairs() {
        let mut registry = registry_of(&["A", "B", "C"]);
        registry.suspect(vid("B"), vid("A"));

        let mut a = ev(1, "A", 1, vec![]);
        a.frame = Some(1);
        let mut b = ev(2, "B", 1, vec![]);
        b.frame = Some(1);

        assert!(!forkless_cause(&b, &a, &mut registry, 0));
        assert!(!forkless_cause(&a, &b, &mut registry, 0));
    }
}

//! Atropos leader election.
//!
//! Every new root votes on the candidates of the earliest undecided frame.
//! Roots one frame above the candidates vote directly via forkless-cause;
//! roots two or more frames above aggregate the previous frame's votes,
//! weighted by voter stake. A candidate decided YES becomes the frame's
//! atropos and finalizes a block.

use crate::causality::forkless_cause;
use crate::registry::ValidatorRegistry;
use crate::store::EventStore;
use moirai_types::{EventId, Timestamp, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// A single election vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub decided: bool,
    pub yes: bool,
}

/// The roots of one frame: event uuids in registration order plus the set
/// of creator validators.
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    pub events: Vec<Uuid>,
    pub validators: BTreeSet<ValidatorId>,
}

impl RootSet {
    /// Deterministic candidate order: ascending
    /// `(timestamp, creator, sequence, weight)`.
    pub fn sorted(&self, store: &EventStore) -> Vec<Uuid> {
        let mut roots = self.events.clone();
        roots.sort_by_key(|uuid| {
            store
                .get(uuid)
                .map(|e| (e.timestamp, e.id.creator.clone(), e.id.seq, e.weight))
        });
        roots
    }
}

/// Election state across frames.
#[derive(Debug, Clone)]
pub struct Election {
    /// Per decided frame, votes keyed by `(voter root, candidate root)`.
    votes: HashMap<u64, HashMap<(Uuid, Uuid), Vote>>,
    /// Final vote per decided candidate.
    decided_roots: HashMap<Uuid, Vote>,
    /// Smallest frame whose atropos is undetermined.
    frame_to_decide: u64,
    /// Elected atropos per frame.
    atropos_roots: BTreeMap<u64, EventId>,
    /// 1 + number of decided atropos roots.
    block: u64,
}

impl Election {
    pub fn new() -> Self {
        Self {
            votes: HashMap::new(),
            decided_roots: HashMap::new(),
            frame_to_decide: 1,
            atropos_roots: BTreeMap::new(),
            block: 1,
        }
    }

    pub fn frame_to_decide(&self) -> u64 {
        self.frame_to_decide
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn atropos_of(&self, frame: u64) -> Option<&EventId> {
        self.atropos_roots.get(&frame)
    }

    pub fn atropos_roots(&self) -> &BTreeMap<u64, EventId> {
        &self.atropos_roots
    }

    pub fn is_decided(&self, candidate: &Uuid) -> bool {
        self.decided_roots.contains_key(candidate)
    }

    pub fn vote(&self, frame: u64, voter: Uuid, candidate: Uuid) -> Option<Vote> {
        self.votes
            .get(&frame)
            .and_then(|table| table.get(&(voter, candidate)))
            .copied()
    }

    /// Run the election rounds triggered by a newly registered root.
    ///
    /// After a decided-yes advances `frame_to_decide`, the loop re-enters
    /// against the next frame's candidates with the same voter; a decided-no
    /// only skips the candidate within the frame.
    pub fn on_new_root(
        &mut self,
        voter: Uuid,
        engine_frame: u64,
        root_sets: &BTreeMap<u64, RootSet>,
        store: &mut EventStore,
        registry: &mut ValidatorRegistry,
        now: Timestamp,
    ) {
        loop {
            let Some(candidates) = root_sets.get(&self.frame_to_decide) else {
                return;
            };
            let direct = engine_frame == self.frame_to_decide + 1;
            let aggregate = engine_frame >= self.frame_to_decide + 2;
            if !direct && !aggregate {
                return;
            }

            let mut advanced = false;
            for candidate in candidates.sorted(store) {
                let table = self.votes.entry(self.frame_to_decide).or_default();
                if table.contains_key(&(voter, candidate)) {
                    continue;
                }

                let vote = if direct {
                    let (Some(a), Some(b)) = (store.get(&voter), store.get(&candidate)) else {
                        continue;
                    };
                    Vote {
                        decided: false,
                        yes: forkless_cause(a, b, registry, now),
                    }
                } else {
                    self.aggregate_vote(candidate, engine_frame, root_sets, store, registry, now)
                };

                self.votes
                    .entry(self.frame_to_decide)
                    .or_default()
                    .insert((voter, candidate), vote);

                if vote.decided {
                    self.decided_roots.insert(candidate, vote);
                    if vote.yes {
                        if let Some(elected) = store.get_mut(&candidate) {
                            elected.is_atropos = true;
                            tracing::info!(
                                "atropos of frame {} elected: {} (block {})",
                                self.frame_to_decide,
                                elected.id,
                                self.block + 1
                            );
                            self.atropos_roots
                                .insert(self.frame_to_decide, elected.id.clone());
                        }
                        self.frame_to_decide += 1;
                        self.block += 1;
                        advanced = true;
                        break;
                    }
                }
            }

            if !advanced {
                return;
            }
        }
    }

    /// Aggregation round: tally the previous frame roots' stored votes on
    /// a candidate, weighted by their creators. Missing votes count as no.
    fn aggregate_vote(
        &self,
        candidate: Uuid,
        engine_frame: u64,
        root_sets: &BTreeMap<u64, RootSet>,
        store: &EventStore,
        registry: &mut ValidatorRegistry,
        now: Timestamp,
    ) -> Vote {
        let mut yes_total: Weight = 0;
        let mut no_total: Weight = 0;

        if let Some(previous) = root_sets.get(&(engine_frame - 1)) {
            for prev_root in &previous.events {
                let Some(prev_event) = store.get(prev_root) else {
                    continue;
                };
                let weight = registry.weight(&prev_event.id.creator);
                let prev_vote = self
                    .votes
                    .get(&self.frame_to_decide)
                    .and_then(|table| table.get(&(*prev_root, candidate)))
                    .copied()
                    .unwrap_or(Vote {
                        decided: false,
                        yes: false,
                    });
                if prev_vote.yes {
                    yes_total += weight;
                } else {
                    no_total += weight;
                }
            }
        }

        let quorum = registry.quorum(engine_frame, now);
        Vote {
            decided: yes_total >= quorum || no_total >= quorum,
            yes: yes_total > no_total,
        }
    }
}

impl Default for Election {
    fn default() -> Self {
        Self::new()
    }
}

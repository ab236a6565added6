//! Moirai Network - in-memory multi-instance coordination with pull gossip.
//!
//! One consensus engine per validator, all sharing the initial validator
//! set. A global logical clock advances in discrete timesteps; each
//! timestep runs three barrier phases across every instance:
//!
//! 1. **Defer** - deliver each event to its creator's instance, queueing
//!    requests for unknown parents at the parents' creator instances.
//! 2. **Serve** - every instance drains its request queue, copying the
//!    bare identity of requested events to the requesters and recursively
//!    requesting their unknown parents.
//! 3. **Process** - every instance ingests its deferred events in
//!    `(timestamp, id, uuid)` order and advances its clock.
//!
//! The barrier between phases is the only synchronization: a requester can
//! never ingest a child before the owning instance had a chance to serve
//! the parent.

use moirai_consensus::{EngineConfig, Lachesis};
use moirai_types::{Event, Timestamp, ValidatorId, Weight};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

/// How events of equal timestamp are ordered before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderingMode {
    /// Sort by `(id, uuid)`: reproducible runs.
    Deterministic,
    /// Shuffle each timestep bucket with a seeded generator.
    Shuffled { seed: u64 },
}

/// Coordinator configuration.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub ordering: OrderingMode,
    /// Configuration handed to every per-validator engine.
    pub engine: EngineConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingMode::Deterministic,
            engine: EngineConfig::default(),
        }
    }
}

/// A pull-gossip request: `requester` wants the event `wanted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub requester: ValidatorId,
    pub wanted: Uuid,
}

/// One validator's node: its engine plus the gossip queues.
#[derive(Debug)]
struct Node {
    engine: Lachesis,
    /// Deferred events awaiting Phase 3, keyed by uuid so duplicate
    /// deliveries collapse.
    process_queue: HashMap<Uuid, Event>,
    /// Pull requests other instances addressed to this one.
    request_queue: VecDeque<Request>,
}

impl Node {
    fn knows(&self, uuid: &Uuid) -> bool {
        self.engine.contains(uuid) || self.process_queue.contains_key(uuid)
    }
}

/// Drives one engine per validator through timestep phases.
#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    nodes: BTreeMap<ValidatorId, Node>,
    /// Creator of every event the coordinator has seen; lets Phase 1 route
    /// parent requests to the owning instance.
    origins: HashMap<Uuid, ValidatorId>,
    /// The initial validator set, seeded into every new instance.
    initial: Vec<(ValidatorId, Weight)>,
    time: Timestamp,
}

impl Coordinator {
    pub fn new(initial: impl IntoIterator<Item = (ValidatorId, Weight)>) -> Self {
        Self::with_config(initial, CoordinatorConfig::default())
    }

    pub fn with_config(
        initial: impl IntoIterator<Item = (ValidatorId, Weight)>,
        config: CoordinatorConfig,
    ) -> Self {
        let initial: Vec<(ValidatorId, Weight)> = initial.into_iter().collect();
        let mut coordinator = Self {
            config,
            nodes: BTreeMap::new(),
            origins: HashMap::new(),
            initial: initial.clone(),
            time: 0,
        };
        for (validator, weight) in initial {
            coordinator.ensure_instance(&validator, weight);
        }
        coordinator
    }

    /// The engine owned by a validator.
    pub fn instance(&self, validator: &ValidatorId) -> Option<&Lachesis> {
        self.nodes.get(validator).map(|node| &node.engine)
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorId> {
        self.nodes.keys()
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Bucket events by timestamp and run every timestep from the first
    /// to the last, including empty ones (clocks advance regardless).
    pub fn run(&mut self, events: Vec<Event>) {
        let mut buckets: BTreeMap<Timestamp, Vec<Event>> = BTreeMap::new();
        for event in events {
            buckets.entry(event.timestamp).or_default().push(event);
        }
        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return;
        };
        for t in first..=last {
            if self.time < t {
                self.time = t;
            }
            let bucket = buckets.remove(&t).unwrap_or_default();
            self.ingest_timestep(bucket);
        }
    }

    /// Run phases 1-3 for one timestep's events at the current time.
    pub fn ingest_timestep(&mut self, events: Vec<Event>) {
        self.defer(events);
        self.serve_requests();
        self.process_deferred();
        self.time += 1;
    }

    /// Phase 1: deliver events to their creators and request unknown
    /// parents from the parents' creator instances.
    fn defer(&mut self, mut bucket: Vec<Event>) {
        match self.config.ordering {
            OrderingMode::Deterministic => {
                bucket.sort_by(|a, b| (&a.id, a.uuid).cmp(&(&b.id, b.uuid)));
            }
            OrderingMode::Shuffled { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(self.time));
                bucket.shuffle(&mut rng);
            }
        }

        // Index origins for the whole bucket first, so same-timestep
        // parents resolve to their creator instance.
        for event in &bucket {
            self.origins.insert(event.uuid, event.id.creator.clone());
        }

        for event in bucket {
            let creator = event.id.creator.clone();
            self.ensure_instance(&creator, event.weight);
            let Some(node) = self.nodes.get_mut(&creator) else {
                continue;
            };
            let missing: Vec<Uuid> = event
                .parents
                .iter()
                .filter(|parent| !node.knows(parent))
                .copied()
                .collect();
            node.process_queue.insert(event.uuid, event);

            for parent in missing {
                let Some(owner) = self.origins.get(&parent).cloned() else {
                    tracing::debug!("parent {} has no known origin, not requested", parent);
                    continue;
                };
                let Some(owner_node) = self.nodes.get_mut(&owner) else {
                    continue;
                };
                owner_node.request_queue.push_back(Request {
                    requester: creator.clone(),
                    wanted: parent,
                });
            }
        }
    }

    /// Phase 2: each instance drains its request queue, serving bare event
    /// copies and recursively requesting unknown parents on its own queue.
    fn serve_requests(&mut self) {
        let servers: Vec<ValidatorId> = self.nodes.keys().cloned().collect();
        for server in servers {
            loop {
                let Some(request) = self
                    .nodes
                    .get_mut(&server)
                    .and_then(|node| node.request_queue.pop_front())
                else {
                    break;
                };

                let served = {
                    let Some(node) = self.nodes.get(&server) else {
                        break;
                    };
                    let found = node
                        .engine
                        .event_by_uuid(&request.wanted)
                        .or_else(|| node.process_queue.get(&request.wanted));
                    match found {
                        Some(event) if node.engine.is_cheater(event.creator()) => {
                            tracing::warn!(
                                "{} refuses to serve event {} of confirmed cheater {}",
                                server,
                                event.id,
                                event.creator()
                            );
                            None
                        }
                        Some(event) => Some(event.copy_basic()),
                        // Unknown here: the request dies silently.
                        None => None,
                    }
                };
                let Some(event) = served else {
                    continue;
                };

                let Some(requester_node) = self.nodes.get_mut(&request.requester) else {
                    continue;
                };
                if requester_node.knows(&event.uuid) {
                    continue;
                }
                let unknown_parents: Vec<Uuid> = event
                    .parents
                    .iter()
                    .filter(|parent| !requester_node.knows(parent))
                    .copied()
                    .collect();
                requester_node.process_queue.insert(event.uuid, event);

                if let Some(server_node) = self.nodes.get_mut(&server) {
                    for parent in unknown_parents {
                        server_node.request_queue.push_back(Request {
                            requester: request.requester.clone(),
                            wanted: parent,
                        });
                    }
                }
            }
        }
    }

    /// Phase 3: ingest deferred events in `(timestamp, id, uuid)` order.
    /// Events whose parents are still unknown stay queued for a later
    /// timestep; duplicates of stored events are discarded.
    fn process_deferred(&mut self) {
        let time = self.time;
        for (validator, node) in self.nodes.iter_mut() {
            node.engine.set_time(time);

            let mut deferred: Vec<Event> = node.process_queue.drain().map(|(_, e)| e).collect();
            deferred.sort_by(|a, b| {
                (a.timestamp, &a.id, a.uuid).cmp(&(b.timestamp, &b.id, b.uuid))
            });

            let mut retained = Vec::new();
            for event in deferred {
                if node.engine.contains(&event.uuid) {
                    continue;
                }
                if event
                    .parents
                    .iter()
                    .any(|parent| *parent != event.uuid && !node.engine.contains(parent))
                {
                    retained.push(event);
                    continue;
                }
                if let Err(error) = node.engine.ingest(event) {
                    tracing::warn!("instance {} dropped an event: {}", validator, error);
                }
            }
            for event in retained {
                node.process_queue.insert(event.uuid, event);
            }

            node.engine.advance_time();
        }
    }

    fn ensure_instance(&mut self, validator: &ValidatorId, weight: Weight) {
        if self.nodes.contains_key(validator) {
            return;
        }
        let mut engine = Lachesis::for_validator(validator.clone(), self.config.engine);
        for (v, w) in &self.initial {
            engine.register_validator(v, *w);
        }
        engine.register_validator(validator, weight);
        engine.set_time(self.time);
        self.nodes.insert(
            validator.clone(),
            Node {
                engine,
                process_queue: HashMap::new(),
                request_queue: VecDeque::new(),
            },
        );
    }
}

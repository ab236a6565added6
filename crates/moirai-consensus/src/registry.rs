//! Weighted validator registry and quorum bookkeeping.
//!
//! Tracks stake weights, cheater suspicion/confirmation, and observed
//! liveness. Quorum values are cached per frame and recomputed lazily:
//! a recomputation first promotes suspects whose accuser weight crosses
//! the threshold, then zeroes validators inactive past the threshold.

use moirai_types::{Timestamp, ValidatorId, Weight};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Time units a validator may go unobserved before its weight is
    /// zeroed for quorum purposes. Zeroing is irreversible.
    pub inactivity_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: 20,
        }
    }
}

/// Registry of validators, their effective weights, and cheater state.
#[derive(Debug, Clone)]
pub struct ValidatorRegistry {
    /// Effective weight per validator (zero once confirmed or inactive).
    weights: BTreeMap<ValidatorId, Weight>,
    /// Quorum value per frame; dropped for current and later frames when
    /// weights change mid-stream.
    quorum_cache: HashMap<u64, Weight>,
    /// Validators with at least one accusation against them.
    suspected: BTreeSet<ValidatorId>,
    /// Validators whose accuser weight crossed the promotion threshold.
    confirmed: BTreeSet<ValidatorId>,
    /// Observer validator -> validators it has witnessed equivocating.
    accusations: BTreeMap<ValidatorId, BTreeSet<ValidatorId>>,
    /// Latest creation timestamp observed per validator, merged in from
    /// event ancestry; drives inactivity zeroing.
    observed_timestamps: HashMap<ValidatorId, Timestamp>,
    inactivity_threshold: u64,
}

impl ValidatorRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            weights: BTreeMap::new(),
            quorum_cache: HashMap::new(),
            suspected: BTreeSet::new(),
            confirmed: BTreeSet::new(),
            accusations: BTreeMap::new(),
            observed_timestamps: HashMap::new(),
            inactivity_threshold: config.inactivity_threshold,
        }
    }

    /// Register a validator on first sight, or refresh its declared stake.
    /// Confirmed cheaters stay at zero.
    pub fn declare(&mut self, validator: &ValidatorId, weight: Weight) {
        if !self.weights.contains_key(validator) {
            self.weights.insert(validator.clone(), weight);
        } else if !self.confirmed.contains(validator) {
            self.weights.insert(validator.clone(), weight);
        }
    }

    pub fn knows(&self, validator: &ValidatorId) -> bool {
        self.weights.contains_key(validator)
    }

    /// Effective weight; unknown validators weigh nothing.
    pub fn weight(&self, validator: &ValidatorId) -> Weight {
        self.weights.get(validator).copied().unwrap_or(0)
    }

    pub fn total_weight(&self) -> Weight {
        self.weights.values().sum()
    }

    /// All registered weight is gone: nothing can reach quorum anymore.
    pub fn is_halted(&self) -> bool {
        !self.weights.is_empty() && self.weights.values().all(|w| *w == 0)
    }

    /// Record that `observer` witnessed `offender` equivocating.
    /// Returns true when this is new evidence.
    pub fn suspect(&mut self, observer: ValidatorId, offender: ValidatorId) -> bool {
        let new_accusation = self
            .accusations
            .entry(observer.clone())
            .or_default()
            .insert(offender.clone());
        let new_suspect = self.suspected.insert(offender.clone());
        if new_accusation {
            tracing::debug!("{} witnessed {} equivocating", observer, offender);
        }
        new_accusation || new_suspect
    }

    pub fn accuses(&self, observer: &ValidatorId, offender: &ValidatorId) -> bool {
        self.accusations
            .get(observer)
            .map_or(false, |offenders| offenders.contains(offender))
    }

    /// Validators this observer has witnessed equivocating.
    pub fn accused_by(&self, observer: &ValidatorId) -> Option<&BTreeSet<ValidatorId>> {
        self.accusations.get(observer)
    }

    pub fn is_suspected(&self, validator: &ValidatorId) -> bool {
        self.suspected.contains(validator)
    }

    pub fn is_confirmed(&self, validator: &ValidatorId) -> bool {
        self.confirmed.contains(validator)
    }

    /// Suspected or confirmed.
    pub fn is_cheater(&self, validator: &ValidatorId) -> bool {
        self.suspected.contains(validator) || self.confirmed.contains(validator)
    }

    pub fn confirmed_cheaters(&self) -> &BTreeSet<ValidatorId> {
        &self.confirmed
    }

    /// Max-merge an observed creation timestamp for a validator.
    pub fn observe_timestamp(&mut self, validator: &ValidatorId, timestamp: Timestamp) {
        let entry = self
            .observed_timestamps
            .entry(validator.clone())
            .or_insert(timestamp);
        if *entry < timestamp {
            *entry = timestamp;
        }
    }

    pub fn last_observed(&self, validator: &ValidatorId) -> Option<Timestamp> {
        self.observed_timestamps.get(validator).copied()
    }

    /// Quorum threshold for a frame: `2/3 of effective weight + 1`.
    ///
    /// Cached per frame; a cache miss re-derives effective weights first
    /// (cheater promotion, then inactivity zeroing).
    pub fn quorum(&mut self, frame: u64, now: Timestamp) -> Weight {
        if let Some(quorum) = self.quorum_cache.get(&frame) {
            return *quorum;
        }
        let total = self.refresh(now);
        let quorum = 2 * total / 3 + 1;
        self.quorum_cache.insert(frame, quorum);
        quorum
    }

    /// Drop cached quorum values for `frame` and everything later.
    /// Earlier frames keep their values: completed elections are not
    /// retroactively re-judged.
    pub fn invalidate_from(&mut self, frame: u64) {
        self.quorum_cache.retain(|f, _| *f < frame);
    }

    /// Recompute effective weights and return the remaining total.
    fn refresh(&mut self, now: Timestamp) -> Weight {
        let mut total: Weight = self.weights.values().sum();

        let suspects: Vec<ValidatorId> = self.suspected.iter().cloned().collect();
        for offender in suspects {
            if self.confirmed.contains(&offender) {
                continue;
            }
            let threshold = 2 * total / 3 + 1;
            let accuser_weight: Weight = self
                .accusations
                .iter()
                .filter(|(_, offenders)| offenders.contains(&offender))
                .map(|(observer, _)| self.weight(observer))
                .sum();
            if accuser_weight >= threshold {
                self.confirmed.insert(offender.clone());
                let weight = self.weight(&offender);
                total = total.saturating_sub(weight);
                self.weights.insert(offender.clone(), 0);
                tracing::warn!(
                    "validator {} confirmed as cheater (accuser weight {} >= {}), weight zeroed",
                    offender,
                    accuser_weight,
                    threshold
                );
            }
        }

        let observed: Vec<(ValidatorId, Timestamp)> = self
            .observed_timestamps
            .iter()
            .map(|(v, ts)| (v.clone(), *ts))
            .collect();
        for (validator, timestamp) in observed {
            if now.saturating_sub(timestamp) >= self.inactivity_threshold {
                let weight = self.weight(&validator);
                if weight > 0 {
                    total = total.saturating_sub(weight);
                    self.weights.insert(validator.clone(), 0);
                    tracing::warn!(
                        "validator {} unheard of since t={}, weight zeroed at t={}",
                        validator,
                        timestamp,
                        now
                    );
                }
            }
        }

        total
    }
}
